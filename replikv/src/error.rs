//! Error types shared by the runtime and the replication actors.
//!
//! | Error | Fatal? | When it happens |
//! |-------|--------|-----------------|
//! | [`TransportError`] | no | Peer unreachable, mailbox closed, call timed out |
//! | [`ActorFailure`] | yes | A protocol invariant broke; the supervisor restarts the actor |
//! | [`ClientError`] | no | A Raft client write could not be accepted or confirmed |
//! | [`ConfigError`] | startup | The cluster configuration is inconsistent |
//! | [`StartupError`] | startup | A node could not be configured or joined |

use thiserror::Error;

use crate::types::NodeId;

/// Failure to deliver a message or obtain a reply.
///
/// Never fatal: CRDT broadcasts retry on their own schedule and Raft treats
/// the affected peer as "no vote" / "no ack" for the current round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The destination is not registered, crashed, or cut off by a partition.
    #[error("{0} is unreachable")]
    Unreachable(NodeId),

    /// The destination mailbox has been closed.
    #[error("mailbox of {0} is closed")]
    MailboxClosed(String),

    /// The reply promise was dropped before answering.
    #[error("reply from {0} was dropped")]
    ReplyDropped(String),

    /// No reply arrived within the call timeout.
    #[error("call to {0} timed out")]
    Timeout(String),

    /// A node tried to join the network with the wrong cookie.
    #[error("{0} presented an invalid cookie")]
    Handshake(NodeId),

    /// A wire message failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// The peer answered with a reply of the wrong shape.
    #[error("unexpected reply from {0}")]
    UnexpectedReply(String),

    /// A socket operation failed.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Codec(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// A condition that terminates the actor.
///
/// Handlers return this instead of panicking. The supervisor logs the failure
/// and restarts the actor from a fresh state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActorFailure {
    /// A replication protocol invariant was violated.
    #[error("protocol invariant violated: {0}")]
    InvariantViolation(String),

    /// The local storage actor could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] TransportError),
}

impl ActorFailure {
    /// Shorthand for an [`ActorFailure::InvariantViolation`].
    pub fn invariant(message: impl Into<String>) -> Self {
        ActorFailure::InvariantViolation(message.into())
    }
}

/// Errors returned to clients of the Raft actor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// This node is not the leader and does not accept writes.
    #[error("not the leader")]
    NotLeader,

    /// Another leader's entry was committed at the slot of this write.
    #[error("entry {id} was superseded before commit")]
    Superseded {
        /// Log id the write was originally appended at.
        id: u64,
    },

    /// The write could not be delivered or confirmed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors detected while validating a [`ClusterConfig`](crate::ClusterConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A cluster needs at least one node.
    #[error("cluster must have at least one node")]
    EmptyCluster,

    /// The own node id is outside `1..=node_count`.
    #[error("node id {id} is outside 1..={node_count}")]
    NodeIdOutOfRange {
        /// The configured own id.
        id: u32,
        /// The configured cluster size.
        node_count: u32,
    },

    /// The cookie is empty.
    #[error("cluster cookie must not be empty")]
    EmptyCookie,

    /// A duration that must be positive is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The AppendEntries batch size is zero.
    #[error("append batch size must be greater than zero")]
    ZeroBatch,

    /// Offsetting a base port by the node ids runs past 65535.
    #[error("{name} {base} cannot be offset for {node_count} nodes")]
    PortRange {
        /// Which port setting overflows.
        name: &'static str,
        /// The configured base port.
        base: u16,
        /// The configured cluster size.
        node_count: u32,
    },
}

/// Errors that prevent a node from starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartupError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The node could not join the cluster network.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
