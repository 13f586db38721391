//! Core Raft types: log entries, roles, status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// One position of the replicated log.
///
/// A `tombstone` entry deletes `key` when applied; `value` is then empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, starting at 0.
    pub id: u64,
    /// Term of the leader that proposed the entry.
    pub term: u64,
    /// Key written or deleted.
    pub key: String,
    /// Value written.
    pub value: String,
    /// Whether the entry deletes `key`.
    pub tombstone: bool,
}

/// Role of a node in the consensus protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    /// Passive; accepts entries from the leader.
    #[default]
    Follower,
    /// Soliciting votes.
    Candidate,
    /// Accepts client writes and drives replication.
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a node's consensus state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftStatus {
    /// Current role.
    pub role: Role,
    /// Current term.
    pub term: u64,
    /// Candidate voted for in `term`, if any.
    pub voted_for: Option<NodeId>,
    /// Highest committed log id; `None` while nothing is committed.
    pub commit_index: Option<u64>,
    /// Number of entries in the log, committed or not.
    pub log_len: usize,
}
