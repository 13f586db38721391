//! Per-node configuration.
//!
//! A [`ClusterConfig`] is built once at startup and handed to every actor of
//! the node. Nothing is read from process-wide state afterwards.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use replikv::{ClusterConfig, NodeId};
//!
//! let config = ClusterConfig::builder(NodeId::new(2), 3)
//!     .cookie("s3cret")
//!     .http_port(5000)
//!     .peer_port(6000)
//!     .peer_host("node-{id}")
//!     .retry_interval(Duration::from_millis(250))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.peers().count(), 2);
//! assert_eq!(config.http_port(), 5001);
//! assert_eq!(config.peer_addr(NodeId::new(3)), "node-3:6002");
//! ```

use std::time::Duration;

use rand::distr::{Alphanumeric, SampleString};

use crate::crdt::TieBreak;
use crate::error::ConfigError;
use crate::types::NodeId;

/// Which replication strategy a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReplicationMode {
    /// Leaderless vector-clock replication.
    Crdt,
    /// Leader-based log replication.
    Raft,
}

/// Timing and conflict policy of the CRDT actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdtSettings {
    /// Delay before an unacknowledged row is sent again.
    pub retry_interval: Duration,
    /// How concurrent writes to the same key are resolved.
    pub tie_break: TieBreak,
}

impl Default for CrdtSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            tie_break: TieBreak::LocalThreshold,
        }
    }
}

/// Timing of the Raft actor.
///
/// The election timeout must stay well above `heartbeat_interval`, otherwise
/// followers start elections while the leader is healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftSettings {
    /// Lower bound of the randomized election timeout.
    pub election_timeout: Duration,
    /// Random extra added on top of `election_timeout`, drawn uniformly.
    pub election_jitter: Duration,
    /// Period of the leader's AppendEntries round.
    pub heartbeat_interval: Duration,
    /// Timeout of a single RequestVote or AppendEntries call.
    pub call_timeout: Duration,
    /// Maximum number of entries shipped to one peer per round.
    pub append_batch_size: usize,
}

impl Default for RaftSettings {
    fn default() -> Self {
        Self {
            election_timeout: Duration::from_secs(10),
            election_jitter: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(3),
            call_timeout: Duration::from_secs(5),
            append_batch_size: 10,
        }
    }
}

/// Configuration of a single cluster node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    node_id: NodeId,
    node_count: u32,
    cookie: String,
    http_port: u16,
    peer_port: u16,
    peer_host: String,
    client_timeout: Duration,
    crdt: CrdtSettings,
    raft: RaftSettings,
}

impl ClusterConfig {
    /// Start building the configuration of `node_id` in a cluster of
    /// `node_count` nodes.
    pub fn builder(node_id: NodeId, node_count: u32) -> ClusterConfigBuilder {
        ClusterConfigBuilder {
            node_id,
            node_count,
            cookie: None,
            http_port: 5000,
            peer_port: 6000,
            peer_host: "127.0.0.1".to_string(),
            client_timeout: Duration::from_secs(10),
            crdt: CrdtSettings::default(),
            raft: RaftSettings::default(),
        }
    }

    /// The same cluster seen from another member.
    ///
    /// Used when bootstrapping several nodes in one process.
    pub fn for_node(&self, node_id: NodeId) -> Result<Self, ConfigError> {
        let config = Self {
            node_id,
            ..self.clone()
        };
        config.validate()?;
        Ok(config)
    }

    /// This configuration with different Raft settings.
    pub fn with_raft(self, raft: RaftSettings) -> Result<Self, ConfigError> {
        let config = Self { raft, ..self };
        config.validate()?;
        Ok(config)
    }

    /// Own node id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Number of nodes in the cluster.
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Shared secret presented when joining the network.
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// Port this node's HTTP façade listens on: the base port plus the node
    /// id, minus one.
    pub fn http_port(&self) -> u16 {
        offset_port(self.http_port, self.node_id)
    }

    /// Port this node accepts peer traffic on, when nodes run in separate
    /// processes.
    pub fn peer_port(&self) -> u16 {
        offset_port(self.peer_port, self.node_id)
    }

    /// Network address of `node`: the peer host, with `{id}` replaced by the
    /// node id, and that node's peer port.
    pub fn peer_addr(&self, node: NodeId) -> String {
        let host = self.peer_host.replace("{id}", &node.0.to_string());
        format!("{host}:{}", offset_port(self.peer_port, node))
    }

    /// How long the façade waits on a replication actor before giving up.
    pub fn client_timeout(&self) -> Duration {
        self.client_timeout
    }

    /// CRDT settings.
    pub fn crdt(&self) -> &CrdtSettings {
        &self.crdt
    }

    /// Raft settings.
    pub fn raft(&self) -> &RaftSettings {
        &self.raft
    }

    /// Every node of the cluster other than this one, in id order.
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        NodeId::all(self.node_count).filter(move |id| *id != self.node_id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node_count == 0 {
            return Err(ConfigError::EmptyCluster);
        }
        if self.node_id.0 == 0 || self.node_id.0 > self.node_count {
            return Err(ConfigError::NodeIdOutOfRange {
                id: self.node_id.0,
                node_count: self.node_count,
            });
        }
        if self.cookie.is_empty() {
            return Err(ConfigError::EmptyCookie);
        }
        for (name, base) in [("http port", self.http_port), ("peer port", self.peer_port)] {
            if u64::from(base) + u64::from(self.node_count) - 1 > u64::from(u16::MAX) {
                return Err(ConfigError::PortRange {
                    name,
                    base,
                    node_count: self.node_count,
                });
            }
        }
        if self.crdt.retry_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("retry interval"));
        }
        if self.raft.election_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("election timeout"));
        }
        if self.raft.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat interval"));
        }
        if self.raft.call_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("call timeout"));
        }
        if self.client_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("client timeout"));
        }
        if self.raft.append_batch_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        Ok(())
    }
}

fn offset_port(base: u16, node: NodeId) -> u16 {
    base.saturating_add(u16::try_from(node.slot()).unwrap_or(u16::MAX))
}

/// Builder for [`ClusterConfig`].
#[derive(Debug, Clone)]
pub struct ClusterConfigBuilder {
    node_id: NodeId,
    node_count: u32,
    cookie: Option<String>,
    http_port: u16,
    peer_port: u16,
    peer_host: String,
    client_timeout: Duration,
    crdt: CrdtSettings,
    raft: RaftSettings,
}

impl ClusterConfigBuilder {
    /// Set the cluster cookie. A random 16-character cookie is generated
    /// when none is given.
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Set the HTTP port of node 1; node `i` listens on `port + i - 1`.
    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Set the peer port of node 1; node `i` listens on `port + i - 1`.
    pub fn peer_port(mut self, port: u16) -> Self {
        self.peer_port = port;
        self
    }

    /// Set the host peers are reached at. `{id}` is replaced by the peer's
    /// node id, so `node-{id}` resolves node 2 as `node-2`.
    pub fn peer_host(mut self, host: impl Into<String>) -> Self {
        self.peer_host = host.into();
        self
    }

    /// Set the façade's client timeout.
    pub fn client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Set the CRDT retry interval.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.crdt.retry_interval = interval;
        self
    }

    /// Set the CRDT conflict tie-break policy.
    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.crdt.tie_break = tie_break;
        self
    }

    /// Replace all Raft settings.
    pub fn raft(mut self, raft: RaftSettings) -> Self {
        self.raft = raft;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ClusterConfig, ConfigError> {
        let cookie = self
            .cookie
            .unwrap_or_else(|| Alphanumeric.sample_string(&mut rand::rng(), 16));
        let config = ClusterConfig {
            node_id: self.node_id,
            node_count: self.node_count,
            cookie,
            http_port: self.http_port,
            peer_port: self.peer_port,
            peer_host: self.peer_host,
            client_timeout: self.client_timeout,
            crdt: self.crdt,
            raft: self.raft,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::builder(NodeId::new(1), 3)
            .build()
            .expect("valid");
        assert_eq!(config.cookie().len(), 16);
        assert_eq!(config.http_port(), 5000);
        assert_eq!(config.crdt().retry_interval, Duration::from_secs(1));
        assert_eq!(config.raft().append_batch_size, 10);
        assert_eq!(config.raft().heartbeat_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_peers_exclude_self() {
        let config = ClusterConfig::builder(NodeId::new(2), 4)
            .cookie("c")
            .build()
            .expect("valid");
        let peers: Vec<_> = config.peers().collect();
        assert_eq!(peers, vec![NodeId(1), NodeId(3), NodeId(4)]);
    }

    #[test]
    fn test_ports_are_offset_per_node() {
        let config = ClusterConfig::builder(NodeId::new(1), 3)
            .cookie("c")
            .http_port(5000)
            .peer_port(7000)
            .build()
            .expect("valid");
        let third = config.for_node(NodeId::new(3)).expect("valid");
        assert_eq!(config.http_port(), 5000);
        assert_eq!(third.http_port(), 5002);
        assert_eq!(third.peer_port(), 7002);
        assert_eq!(config.peer_addr(NodeId::new(2)), "127.0.0.1:7001");
    }

    #[test]
    fn test_rejects_port_overflow() {
        let err = ClusterConfig::builder(NodeId::new(1), 3)
            .cookie("c")
            .http_port(65534)
            .build()
            .expect_err("node 3 would need port 65536");
        assert_eq!(
            err,
            ConfigError::PortRange {
                name: "http port",
                base: 65534,
                node_count: 3
            }
        );
    }

    #[test]
    fn test_rejects_out_of_range_node() {
        let err = ClusterConfig::builder(NodeId::new(4), 3)
            .cookie("c")
            .build()
            .expect_err("node 4 is not in a 3-node cluster");
        assert_eq!(
            err,
            ConfigError::NodeIdOutOfRange {
                id: 4,
                node_count: 3
            }
        );
    }

    #[test]
    fn test_rejects_zero_node() {
        let err = ClusterConfig::builder(NodeId::new(0), 3)
            .cookie("c")
            .build()
            .expect_err("ids are 1-based");
        assert!(matches!(err, ConfigError::NodeIdOutOfRange { id: 0, .. }));
    }

    #[test]
    fn test_rejects_empty_cookie_and_zero_batch() {
        let err = ClusterConfig::builder(NodeId::new(1), 1)
            .cookie("")
            .build()
            .expect_err("empty cookie");
        assert_eq!(err, ConfigError::EmptyCookie);

        let err = ClusterConfig::builder(NodeId::new(1), 1)
            .cookie("c")
            .raft(RaftSettings {
                append_batch_size: 0,
                ..RaftSettings::default()
            })
            .build()
            .expect_err("zero batch");
        assert_eq!(err, ConfigError::ZeroBatch);
    }

    #[test]
    fn test_for_node_keeps_cluster_settings() {
        let config = ClusterConfig::builder(NodeId::new(1), 3)
            .cookie("shared")
            .retry_interval(Duration::from_millis(100))
            .build()
            .expect("valid");
        let other = config.for_node(NodeId::new(3)).expect("valid");
        assert_eq!(other.node_id(), NodeId(3));
        assert_eq!(other.cookie(), "shared");
        assert_eq!(other.crdt(), config.crdt());
        assert!(config.for_node(NodeId::new(9)).is_err());
    }

    #[test]
    fn test_with_raft_validates() {
        let config = ClusterConfig::builder(NodeId::new(1), 3)
            .cookie("c")
            .build()
            .expect("valid");
        let fast = config
            .clone()
            .with_raft(RaftSettings {
                election_timeout: Duration::from_secs(1),
                ..RaftSettings::default()
            })
            .expect("valid");
        assert_eq!(fast.raft().election_timeout, Duration::from_secs(1));

        let err = config
            .with_raft(RaftSettings {
                heartbeat_interval: Duration::ZERO,
                ..RaftSettings::default()
            })
            .expect_err("zero heartbeat");
        assert_eq!(err, ConfigError::ZeroDuration("heartbeat interval"));
    }
}
