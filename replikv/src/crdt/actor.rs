//! The CRDT replication actor and its client handle.
//!
//! ```text
//!  client ─ClientWrite─► origin ──NewRow──► peer
//!                          │  ◄─NewRowAck──┘
//!                          │
//!                          └─ RetryNewRow (every retry_interval, until acked)
//! ```
//!
//! Every `(write, peer)` pair has exactly one pending retry timer, keyed by
//! the origin's own clock slot in the row and the peer id. The ack removes
//! it; a retry message arriving after its key was removed is dropped.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::error::{ActorFailure, TransportError};
use crate::runtime::{Actor, ActorContext, ActorRef, Network, ReplyPromise, ScheduledTask};
use crate::types::NodeId;

use super::clock::VectorClock;
use super::messages::{
    CrdtMessage, CrdtRequest, CrdtResponse, CrdtRowValue, NewRow, NewRowAck, RetryNewRow,
};
use super::state::{Applied, ReplicaState};

/// Identifies one unacknowledged delivery: which of our writes, to whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RetryKey {
    self_id: u64,
    to: NodeId,
}

/// Leaderless replication actor of one node.
pub struct CrdtActor {
    config: ClusterConfig,
    network: Network<CrdtActor>,
    state: ReplicaState,
    retries: HashMap<RetryKey, ScheduledTask>,
}

impl CrdtActor {
    /// Fresh actor for the node described by `config`.
    pub fn new(config: ClusterConfig, network: Network<CrdtActor>) -> Self {
        let state = ReplicaState::new(
            config.node_id(),
            config.node_count(),
            config.crdt().tie_break,
        );
        Self {
            config,
            network,
            state,
            retries: HashMap::new(),
        }
    }

    fn id(&self) -> NodeId {
        self.config.node_id()
    }

    fn deliver(&self, to: NodeId, msg: &NewRow) {
        let message = CrdtMessage::NewRow(msg.clone());
        if let Err(err) = self.network.send(self.id(), to, &message) {
            warn!(node = %self.id(), peer = %to, key = %msg.row.key, error = %err, "row delivery failed");
        }
    }

    fn schedule_retry(&mut self, ctx: &ActorContext<Self>, to: NodeId, msg: NewRow) {
        let key = RetryKey {
            self_id: msg.row.timestamp.get(self.id()),
            to,
        };
        let retry = CrdtMessage::RetryNewRow(RetryNewRow { to, msg });
        let task = ctx.send_after(retry, self.config.crdt().retry_interval);
        self.retries.insert(key, task);
    }

    fn broadcast(&mut self, ctx: &ActorContext<Self>, msg: NewRow) {
        let peers: Vec<NodeId> = self.config.peers().collect();
        for peer in peers {
            self.deliver(peer, &msg);
            self.schedule_retry(ctx, peer, msg.clone());
        }
    }

    fn on_new_row(&mut self, msg: NewRow) -> Result<(), ActorFailure> {
        let applied = self.state.receive(msg.from, &msg.row)?;
        if applied == Applied::Duplicate {
            debug!(node = %self.id(), origin = %msg.from, key = %msg.row.key, "duplicate row");
        }

        let ack = CrdtMessage::NewRowAck(NewRowAck {
            self_id: msg.row.timestamp.get(msg.from),
            from: self.id(),
        });
        if let Err(err) = self.network.send(self.id(), msg.from, &ack) {
            warn!(node = %self.id(), peer = %msg.from, error = %err, "ack delivery failed");
        }
        Ok(())
    }

    fn on_ack(&mut self, ack: NewRowAck) {
        let key = RetryKey {
            self_id: ack.self_id,
            to: ack.from,
        };
        match self.retries.remove(&key) {
            Some(task) => {
                task.cancel();
                debug!(node = %self.id(), peer = %ack.from, self_id = ack.self_id, "row acknowledged");
            }
            None => debug!(node = %self.id(), peer = %ack.from, self_id = ack.self_id, "ignoring unknown ack"),
        }
    }

    fn on_retry(&mut self, ctx: &ActorContext<Self>, retry: RetryNewRow) {
        let key = RetryKey {
            self_id: retry.msg.row.timestamp.get(self.id()),
            to: retry.to,
        };
        if !self.retries.contains_key(&key) {
            debug!(node = %self.id(), peer = %retry.to, "dropping retry of acknowledged row");
            return;
        }
        debug!(node = %self.id(), peer = %retry.to, key = %retry.msg.row.key, "retrying row");
        self.deliver(retry.to, &retry.msg);
        self.schedule_retry(ctx, retry.to, retry.msg);
    }
}

#[async_trait]
impl Actor for CrdtActor {
    type Message = CrdtMessage;
    type Request = CrdtRequest;
    type Response = CrdtResponse;

    async fn init(&mut self, ctx: &ActorContext<Self>) -> Result<(), ActorFailure> {
        info!(
            actor = ctx.name(),
            node = %self.id(),
            tie_break = ?self.config.crdt().tie_break,
            "crdt replica ready"
        );
        Ok(())
    }

    async fn handle_message(
        &mut self,
        ctx: &ActorContext<Self>,
        message: CrdtMessage,
    ) -> Result<(), ActorFailure> {
        match message {
            CrdtMessage::ClientWrite { key, value } => {
                let msg = self.state.local_write(key, value)?;
                info!(
                    node = %self.id(),
                    key = %msg.row.key,
                    timestamp = %msg.row.timestamp,
                    "local write"
                );
                self.broadcast(ctx, msg);
            }
            CrdtMessage::NewRow(msg) => self.on_new_row(msg)?,
            CrdtMessage::NewRowAck(ack) => self.on_ack(ack),
            CrdtMessage::RetryNewRow(retry) => self.on_retry(ctx, retry),
        }
        Ok(())
    }

    async fn handle_call(
        &mut self,
        _ctx: &ActorContext<Self>,
        request: CrdtRequest,
        reply: ReplyPromise<CrdtResponse>,
    ) -> Result<(), ActorFailure> {
        let response = match request {
            CrdtRequest::Get { key } => CrdtResponse::Value(self.state.get(&key).map(str::to_string)),
            CrdtRequest::Snapshot { key } => CrdtResponse::Snapshot(self.state.snapshot(&key).cloned()),
            CrdtRequest::Clock => CrdtResponse::Clock(self.state.clock().clone()),
            CrdtRequest::PendingRetries => CrdtResponse::PendingRetries(self.retries.len()),
        };
        reply.send(response);
        Ok(())
    }
}

/// Typed client of a local [`CrdtActor`].
#[derive(Debug, Clone)]
pub struct CrdtHandle {
    actor: ActorRef<CrdtActor>,
    timeout: Duration,
}

impl CrdtHandle {
    /// Wrap `actor`, waiting at most `timeout` for each read.
    pub fn new(actor: ActorRef<CrdtActor>, timeout: Duration) -> Self {
        Self { actor, timeout }
    }

    /// Submit a write. Returns once the write is enqueued, not applied.
    pub fn write(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), TransportError> {
        self.actor.send(CrdtMessage::ClientWrite {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Read the local value of `key`.
    pub async fn read(&self, key: &str) -> Result<Option<String>, TransportError> {
        match self.call(CrdtRequest::Get { key: key.to_string() }).await? {
            CrdtResponse::Value(value) => Ok(value),
            _ => Err(self.unexpected()),
        }
    }

    /// Stored value of `key` with its clock and origin.
    pub async fn snapshot(&self, key: &str) -> Result<Option<CrdtRowValue>, TransportError> {
        match self.call(CrdtRequest::Snapshot { key: key.to_string() }).await? {
            CrdtResponse::Snapshot(value) => Ok(value),
            _ => Err(self.unexpected()),
        }
    }

    /// The replica's vector clock.
    pub async fn clock(&self) -> Result<VectorClock, TransportError> {
        match self.call(CrdtRequest::Clock).await? {
            CrdtResponse::Clock(clock) => Ok(clock),
            _ => Err(self.unexpected()),
        }
    }

    /// Number of deliveries still awaiting acknowledgment.
    pub async fn pending_retries(&self) -> Result<usize, TransportError> {
        match self.call(CrdtRequest::PendingRetries).await? {
            CrdtResponse::PendingRetries(count) => Ok(count),
            _ => Err(self.unexpected()),
        }
    }

    async fn call(&self, request: CrdtRequest) -> Result<CrdtResponse, TransportError> {
        self.actor.call(request, self.timeout).await
    }

    fn unexpected(&self) -> TransportError {
        TransportError::UnexpectedReply(self.actor.name().to_string())
    }
}
