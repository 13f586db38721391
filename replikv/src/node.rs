//! Node bootstrap: spawn a node's actors and join them to the cluster.
//!
//! Each node runs one replication actor, registered on the service network
//! under its node id, plus (for Raft) a storage actor. Actor names follow
//! `node-{id}/{service}`.
//!
//! Two deployments are supported:
//!
//! - one node per process: [`start_crdt_process`] / [`start_raft_process`]
//!   run the local node and reach every peer over TCP at
//!   [`ClusterConfig::peer_addr`];
//! - the whole cluster in one process: [`CrdtCluster`] and [`RaftCluster`]
//!   share one in-process network, which also carries fault injection.

use tokio::net::TcpListener;
use tracing::info;

use crate::config::ClusterConfig;
use crate::crdt::{CrdtActor, CrdtHandle};
use crate::error::{ConfigError, StartupError, TransportError};
use crate::raft::{RaftActor, RaftHandle};
use crate::runtime::{Actor, Network, RestartPolicy, spawn_supervised};
use crate::storage::Storage;
use crate::types::NodeId;

/// Network service name of the CRDT actors.
pub const CRDT_SERVICE: &str = "crdtactor";

/// Network service name of the Raft actors.
pub const RAFT_SERVICE: &str = "raftactor";

/// Spawn the CRDT actor of `config`'s node and register it on `network`.
pub fn spawn_crdt_node(
    config: ClusterConfig,
    network: &Network<CrdtActor>,
) -> Result<CrdtHandle, TransportError> {
    let id = config.node_id();
    let cookie = config.cookie().to_string();
    let timeout = config.client_timeout();
    let net = network.clone();

    let actor = spawn_supervised(
        format!("{}/{CRDT_SERVICE}", id.name()),
        move || CrdtActor::new(config.clone(), net.clone()),
        RestartPolicy::default(),
    );
    network.join(id, &cookie, actor.clone())?;
    Ok(CrdtHandle::new(actor, timeout))
}

/// Spawn the storage and Raft actors of `config`'s node and register the
/// Raft actor on `network`.
pub fn spawn_raft_node(
    config: ClusterConfig,
    network: &Network<RaftActor>,
) -> Result<RaftHandle, TransportError> {
    let id = config.node_id();
    let cookie = config.cookie().to_string();
    let timeout = config.client_timeout();
    let storage = Storage::spawn(format!("{}/storage", id.name()), config.raft().call_timeout);
    let net = network.clone();
    let actor_storage = storage.clone();

    let actor = spawn_supervised(
        format!("{}/{RAFT_SERVICE}", id.name()),
        move || RaftActor::new(config.clone(), net.clone(), actor_storage.clone()),
        RestartPolicy::default(),
    );
    network.join(id, &cookie, actor.clone())?;
    Ok(RaftHandle::new(actor, storage, timeout))
}

fn remote_network<A: Actor>(service: &'static str, config: &ClusterConfig) -> Network<A> {
    let network = Network::new(service, config.cookie());
    for peer in config.peers() {
        network.connect(peer, config.peer_addr(peer));
    }
    network
}

/// Run `config`'s CRDT node as the only node of this process.
///
/// Peer traffic is accepted on `listener`; the other nodes are reached at
/// their peer addresses.
pub fn start_crdt_process(
    config: &ClusterConfig,
    listener: TcpListener,
) -> Result<CrdtHandle, StartupError> {
    let network = remote_network(CRDT_SERVICE, config);
    let handle = spawn_crdt_node(config.clone(), &network)?;
    network.listen(listener, config.node_id(), config.client_timeout());
    info!(node = %config.node_id(), "crdt node started");
    Ok(handle)
}

/// Run `config`'s Raft node as the only node of this process.
///
/// Peer traffic is accepted on `listener`; the other nodes are reached at
/// their peer addresses.
pub fn start_raft_process(
    config: &ClusterConfig,
    listener: TcpListener,
) -> Result<RaftHandle, StartupError> {
    let network = remote_network(RAFT_SERVICE, config);
    let handle = spawn_raft_node(config.clone(), &network)?;
    network.listen(listener, config.node_id(), config.raft().call_timeout);
    info!(node = %config.node_id(), "raft node started");
    Ok(handle)
}

fn member<T>(nodes: &[T], id: NodeId) -> Option<&T> {
    (id.0 as usize).checked_sub(1).and_then(|slot| nodes.get(slot))
}

/// Every node of a CRDT cluster, running in this process.
pub struct CrdtCluster {
    network: Network<CrdtActor>,
    nodes: Vec<CrdtHandle>,
}

impl CrdtCluster {
    /// Start all `config.node_count()` nodes.
    pub fn start(config: &ClusterConfig) -> Result<Self, StartupError> {
        let network = Network::new(CRDT_SERVICE, config.cookie());
        let mut nodes = Vec::with_capacity(config.node_count() as usize);
        for id in NodeId::all(config.node_count()) {
            nodes.push(spawn_crdt_node(config.for_node(id)?, &network)?);
        }
        info!(nodes = nodes.len(), "crdt cluster started");
        Ok(Self { network, nodes })
    }

    /// Handle on node `id`.
    pub fn node(&self, id: NodeId) -> Option<&CrdtHandle> {
        member(&self.nodes, id)
    }

    /// Handles on every node, in id order.
    pub fn nodes(&self) -> &[CrdtHandle] {
        &self.nodes
    }

    /// The shared network, for fault injection.
    pub fn network(&self) -> &Network<CrdtActor> {
        &self.network
    }
}

/// Every node of a Raft cluster, running in this process.
pub struct RaftCluster {
    network: Network<RaftActor>,
    nodes: Vec<RaftHandle>,
}

impl RaftCluster {
    /// Start all `config.node_count()` nodes.
    ///
    /// `tune` may adjust each node's configuration before it starts, e.g. to
    /// give one node a shorter election timeout.
    pub fn start_with<F>(config: &ClusterConfig, mut tune: F) -> Result<Self, StartupError>
    where
        F: FnMut(ClusterConfig) -> Result<ClusterConfig, ConfigError>,
    {
        let network = Network::new(RAFT_SERVICE, config.cookie());
        let mut nodes = Vec::with_capacity(config.node_count() as usize);
        for id in NodeId::all(config.node_count()) {
            let node_config = tune(config.for_node(id)?)?;
            nodes.push(spawn_raft_node(node_config, &network)?);
        }
        info!(nodes = nodes.len(), "raft cluster started");
        Ok(Self { network, nodes })
    }

    /// Start all nodes with the same configuration.
    pub fn start(config: &ClusterConfig) -> Result<Self, StartupError> {
        Self::start_with(config, Ok)
    }

    /// Handle on node `id`.
    pub fn node(&self, id: NodeId) -> Option<&RaftHandle> {
        member(&self.nodes, id)
    }

    /// Handles on every node, in id order.
    pub fn nodes(&self) -> &[RaftHandle] {
        &self.nodes
    }

    /// The shared network, for fault injection.
    pub fn network(&self) -> &Network<RaftActor> {
        &self.network
    }
}
