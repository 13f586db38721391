//! Network connecting the same service across cluster nodes.
//!
//! Each replication actor joins the network under its [`NodeId`] after a
//! cookie handshake. Peers then address each other by id (`node-{id}`).
//! A peer is either a member of this process or a remote address registered
//! with [`Network::connect`]; every message crossing a node boundary is
//! JSON-encoded (see [`codec`](super::codec)).
//!
//! ## Socket protocol
//!
//! One connection per message. The sender writes a single line holding a
//! frame with the cluster cookie, its node id and the payload. For a call the
//! receiver answers with one line holding the response; on any failure,
//! including a cookie mismatch, it closes the connection without answering.
//!
//! ## Faults
//!
//! The network also carries the fault model used by tests: a node can be
//! isolated (its traffic dropped in both directions) and individual links can
//! be cut. A failed delivery surfaces as [`TransportError::Unreachable`], the
//! same error a crashed peer would produce.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::types::NodeId;

use super::actor::{Actor, ActorRef};
use super::codec;

struct Topology<A: Actor> {
    members: HashMap<NodeId, ActorRef<A>>,
    remotes: HashMap<NodeId, String>,
    isolated: HashSet<NodeId>,
    cut: HashSet<(NodeId, NodeId)>,
}

struct Shared<A: Actor> {
    service: &'static str,
    cookie: String,
    topology: RwLock<Topology<A>>,
}

enum Route<A: Actor> {
    Local(ActorRef<A>),
    Remote(String),
}

#[derive(Serialize, Deserialize)]
struct Frame<B> {
    cookie: String,
    from: NodeId,
    body: B,
}

#[derive(Serialize, Deserialize)]
enum Body<M, Q> {
    Message(M),
    Call(Q),
}

/// Registry of one service's actors across the cluster.
pub struct Network<A: Actor> {
    shared: Arc<Shared<A>>,
}

impl<A: Actor> Clone for Network<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<A: Actor> Network<A> {
    /// Create the network of `service`, guarded by `cookie`.
    pub fn new(service: &'static str, cookie: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                cookie: cookie.into(),
                topology: RwLock::new(Topology {
                    members: HashMap::new(),
                    remotes: HashMap::new(),
                    isolated: HashSet::new(),
                    cut: HashSet::new(),
                }),
            }),
        }
    }

    /// Register `actor` as the service instance of `node`.
    ///
    /// Rejoining replaces the previous registration.
    pub fn join(&self, node: NodeId, cookie: &str, actor: ActorRef<A>) -> Result<(), TransportError> {
        if cookie != self.shared.cookie {
            warn!(node = %node, service = self.shared.service, "rejected join with invalid cookie");
            return Err(TransportError::Handshake(node));
        }
        self.write().members.insert(node, actor);
        info!(node = %node, service = self.shared.service, "joined network");
        Ok(())
    }

    /// Reach `node` at `addr` (`host:port`), served by another process.
    pub fn connect(&self, node: NodeId, addr: impl Into<String>) {
        let addr = addr.into();
        debug!(node = %node, service = self.shared.service, addr = %addr, "remote peer registered");
        self.write().remotes.insert(node, addr);
    }

    /// Local handle on the instance running on `node`, ignoring faults.
    pub fn member(&self, node: NodeId) -> Option<ActorRef<A>> {
        self.read().members.get(&node).cloned()
    }

    /// Drop all traffic to and from `node`.
    pub fn isolate(&self, node: NodeId) {
        debug!(node = %node, "isolating node");
        self.write().isolated.insert(node);
    }

    /// Undo [`Network::isolate`].
    pub fn reconnect(&self, node: NodeId) {
        debug!(node = %node, "reconnecting node");
        self.write().isolated.remove(&node);
    }

    /// Cut the link between `a` and `b`, in both directions.
    pub fn partition(&self, a: NodeId, b: NodeId) {
        let mut topology = self.write();
        topology.cut.insert((a, b));
        topology.cut.insert((b, a));
    }

    /// Remove every isolation and cut link.
    pub fn heal(&self) {
        let mut topology = self.write();
        topology.isolated.clear();
        topology.cut.clear();
    }

    /// Whether a message from `from` would currently reach `to`.
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        self.route(from, to).is_ok()
    }

    fn route(&self, from: NodeId, to: NodeId) -> Result<Route<A>, TransportError> {
        let topology = self.read();
        if topology.isolated.contains(&from)
            || topology.isolated.contains(&to)
            || topology.cut.contains(&(from, to))
        {
            return Err(TransportError::Unreachable(to));
        }
        if let Some(actor) = topology.members.get(&to) {
            return Ok(Route::Local(actor.clone()));
        }
        topology
            .remotes
            .get(&to)
            .map(|addr| Route::Remote(addr.clone()))
            .ok_or(TransportError::Unreachable(to))
    }

    fn read(&self) -> RwLockReadGuard<'_, Topology<A>> {
        self.shared
            .topology
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Topology<A>> {
        self.shared
            .topology
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A> Network<A>
where
    A: Actor,
    A::Message: Serialize + DeserializeOwned,
    A::Request: Serialize + DeserializeOwned,
    A::Response: Serialize + DeserializeOwned,
{
    /// Send a message from `from` to the instance on `to`.
    ///
    /// Delivery to a remote peer happens in the background; its failures are
    /// only logged.
    pub fn send(&self, from: NodeId, to: NodeId, message: &A::Message) -> Result<(), TransportError> {
        match self.route(from, to)? {
            Route::Local(target) => {
                let message = codec::transfer(message)?;
                target.send(message).map_err(|_| TransportError::Unreachable(to))
            }
            Route::Remote(addr) => {
                let frame = self.frame(from, Body::<&A::Message, &A::Request>::Message(message))?;
                tokio::spawn(async move {
                    if let Err(err) = deliver(&addr, &frame).await {
                        debug!(peer = %to, addr = %addr, error = %err, "remote delivery failed");
                    }
                });
                Ok(())
            }
        }
    }

    /// Call the instance on `to` and wait for its reply, at most `timeout`.
    pub async fn call(
        &self,
        from: NodeId,
        to: NodeId,
        request: &A::Request,
        timeout: Duration,
    ) -> Result<A::Response, TransportError> {
        match self.route(from, to)? {
            Route::Local(target) => {
                let request = codec::transfer(request)?;
                let response = target.call(request, timeout).await.map_err(|err| match err {
                    TransportError::MailboxClosed(_) | TransportError::ReplyDropped(_) => {
                        TransportError::Unreachable(to)
                    }
                    other => other,
                })?;
                codec::transfer(&response)
            }
            Route::Remote(addr) => {
                let frame = self.frame(from, Body::<&A::Message, &A::Request>::Call(request))?;
                let line = tokio::time::timeout(timeout, exchange(&addr, &frame))
                    .await
                    .map_err(|_| TransportError::Timeout(to.name()))?
                    .map_err(|err| {
                        debug!(peer = %to, addr = %addr, error = %err, "remote call failed");
                        TransportError::Unreachable(to)
                    })?
                    .ok_or(TransportError::Unreachable(to))?;
                codec::decode(line.as_bytes())
            }
        }
    }

    /// Accept traffic from other processes for the local member `node`.
    ///
    /// Inbound calls wait at most `timeout` for the local actor. The accept
    /// task runs until the listener fails.
    pub fn listen(&self, listener: TcpListener, node: NodeId, timeout: Duration) {
        let network = self.clone();
        tokio::spawn(async move {
            if let Ok(addr) = listener.local_addr() {
                info!(node = %node, service = network.shared.service, addr = %addr, "accepting peer traffic");
            }
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(node = %node, error = %err, "peer listener failed");
                        return;
                    }
                };
                let network = network.clone();
                tokio::spawn(async move {
                    if let Err(err) = network.accept(stream, node, timeout).await {
                        debug!(node = %node, addr = %addr, error = %err, "inbound frame dropped");
                    }
                });
            }
        });
    }

    async fn accept(&self, stream: TcpStream, node: NodeId, timeout: Duration) -> Result<(), TransportError> {
        let (read, mut write) = stream.into_split();
        let Some(line) = BufReader::new(read).lines().next_line().await? else {
            return Ok(());
        };
        let frame: Frame<Body<A::Message, A::Request>> = codec::decode(line.as_bytes())?;
        if frame.cookie != self.shared.cookie {
            warn!(from = %frame.from, service = self.shared.service, "rejected frame with invalid cookie");
            return Err(TransportError::Handshake(frame.from));
        }
        let Route::Local(target) = self.route(frame.from, node)? else {
            return Err(TransportError::Unreachable(node));
        };

        match frame.body {
            Body::Message(message) => target
                .send(message)
                .map_err(|_| TransportError::Unreachable(node)),
            Body::Call(request) => {
                let response = target.call(request, timeout).await?;
                write.write_all(&codec::encode_line(&response)?).await?;
                Ok(())
            }
        }
    }

    fn frame<B: Serialize>(&self, from: NodeId, body: B) -> Result<Vec<u8>, TransportError> {
        codec::encode_line(&Frame {
            cookie: self.shared.cookie.clone(),
            from,
            body,
        })
    }
}

async fn deliver(addr: &str, frame: &[u8]) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(frame).await?;
    stream.shutdown().await
}

async fn exchange(addr: &str, frame: &[u8]) -> io::Result<Option<String>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(frame).await?;
    BufReader::new(stream).lines().next_line().await
}
