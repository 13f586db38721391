//! Leader-based log replication.
//!
//! A simplified Raft: one leader per term accepts writes, appends them to its
//! log and ships them to followers on every heartbeat. An entry is applied to
//! storage, and its client answered, once a strict majority holds it.
//!
//! Differences from textbook Raft worth knowing about:
//!
//! - votes compare commit indexes, not last log term and index;
//! - followers merge entries by id using the rules in [`state`], after the
//!   usual term and previous-entry checks;
//! - a leader that is cut off keeps its role until it hears of a newer term;
//! - the leader starts every peer with an empty round at its own log end and,
//!   on rejection, falls back to the position after the peer's commit index.

pub mod actor;
pub mod messages;
pub mod state;
pub mod types;

pub use actor::{PendingClientRequest, RaftActor, RaftHandle};
pub use messages::{
    AddEntry, AppendEntries, AppendEntriesResult, LogPosition, RaftMessage, RaftRequest, RaftResponse,
    RequestVote, WriteOutcome,
};
pub use state::RaftState;
pub use types::{LogEntry, RaftStatus, Role};
