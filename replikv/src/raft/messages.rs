//! Messages and calls of the Raft actor.
//!
//! | Call | Sent by | Answer |
//! |---|---|---|
//! | [`RequestVote`] | candidate | [`RaftResponse::Vote`] |
//! | [`AppendEntries`] | leader, every heartbeat | [`RaftResponse::Appended`] |
//! | [`AddEntry`] | HTTP façade | [`RaftResponse::Write`], once applied |
//! | [`RaftRequest::Status`] | tests, tooling | [`RaftResponse::Status`] |
//!
//! Timer messages carry the epoch of the timer that produced them. Arming or
//! cancelling a timer bumps the epoch, so a message that was already queued
//! when its timer got replaced is recognised and ignored.

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

use super::types::{LogEntry, RaftStatus};

/// Vote solicitation from a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVote {
    /// Term the candidate is running in.
    pub term: u64,
    /// Candidate's commit index.
    pub commit_index: Option<u64>,
    /// The candidate.
    pub candidate: NodeId,
}

/// Id and term of one log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    /// Log id.
    pub id: u64,
    /// Term the entry was created in.
    pub term: u64,
}

impl From<&LogEntry> for LogPosition {
    fn from(entry: &LogEntry) -> Self {
        Self {
            id: entry.id,
            term: entry.term,
        }
    }
}

/// Replication round from the leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries {
    /// Leader's term.
    pub term: u64,
    /// The leader.
    pub leader: NodeId,
    /// The leader's entry right before `entries`; `None` when they start the
    /// log. The follower only accepts the round if it holds this entry.
    pub prev: Option<LogPosition>,
    /// Consecutive entries following `prev`.
    pub entries: Vec<LogEntry>,
    /// Leader's commit index.
    pub commit_index: Option<u64>,
}

/// Follower's answer to [`AppendEntries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResult {
    /// Follower's term after handling the request.
    pub term: u64,
    /// Whether the entries were merged. `false` when the leader's term is
    /// behind or the follower does not hold `prev`.
    pub accepted: bool,
    /// Follower's commit index after handling the request.
    pub commit_index: Option<u64>,
}

/// Client write submitted to the leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEntry {
    /// Key to write.
    pub key: String,
    /// Value to write; ignored for tombstones.
    pub value: String,
    /// Delete `key` instead of writing it.
    pub tombstone: bool,
}

/// Self-addressed timer messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    /// No leader contact within the election timeout.
    ElectionTimeout {
        /// Epoch of the election timer.
        epoch: u64,
    },
    /// Time for the leader's next replication round.
    HeartbeatTick {
        /// Epoch of the heartbeat timer.
        epoch: u64,
    },
}

/// Calls answered by the Raft actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftRequest {
    /// See [`RequestVote`].
    RequestVote(RequestVote),
    /// See [`AppendEntries`].
    AppendEntries(AppendEntries),
    /// See [`AddEntry`].
    AddEntry(AddEntry),
    /// Current consensus state.
    Status,
}

/// Outcome of a client write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
    /// The entry was committed and applied at `id`.
    Committed {
        /// Log id of the entry.
        id: u64,
    },
    /// The node is not the leader.
    NotLeader,
    /// Another leader's entry was applied at `id`.
    Superseded {
        /// Log id the write was appended at.
        id: u64,
    },
}

/// Replies of the Raft actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftResponse {
    /// Whether the vote was granted.
    Vote(bool),
    /// Answer to [`AppendEntries`].
    Appended(AppendEntriesResult),
    /// Answer to [`AddEntry`].
    Write(WriteOutcome),
    /// Answer to [`RaftRequest::Status`].
    Status(RaftStatus),
}
