//! Messages exchanged by CRDT replicas.
//!
//! | Message | Direction | Purpose |
//! |---|---|---|
//! | [`NewRow`] | origin → peer | Replicate a locally originated write |
//! | [`NewRowAck`] | peer → origin | Stop retrying that write to that peer |
//! | [`RetryNewRow`] | origin → itself | Timer message driving re-delivery |

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

use super::clock::VectorClock;

/// A write stamped with the clock of its origin at the time it was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtRow {
    /// Key written.
    pub key: String,
    /// Value written.
    pub value: String,
    /// Origin clock right after its own slot was incremented for this write.
    pub timestamp: VectorClock,
}

/// What a replica keeps per key: the accepted value and its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtRowValue {
    /// Accepted value.
    pub value: String,
    /// Clock of the write that produced `value`.
    pub timestamp: VectorClock,
    /// Node that originated the write.
    pub origin: NodeId,
}

/// Replication of a write from its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRow {
    /// Origin of the write.
    pub from: NodeId,
    /// The stamped write.
    pub row: CrdtRow,
}

/// Acknowledgment of a [`NewRow`].
///
/// `self_id` is the origin's own clock slot in the acknowledged row. Together
/// with `from` it identifies exactly one in-flight retry on the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRowAck {
    /// Origin slot value of the acknowledged row.
    pub self_id: u64,
    /// Node sending the acknowledgment.
    pub from: NodeId,
}

/// Self-addressed reminder to send `msg` to `to` again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryNewRow {
    /// Peer that has not acknowledged yet.
    pub to: NodeId,
    /// The row to re-deliver.
    pub msg: NewRow,
}

/// Every message the CRDT actor accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrdtMessage {
    /// A write from a local client.
    ClientWrite {
        /// Key to write.
        key: String,
        /// Value to write.
        value: String,
    },
    /// A write replicated by its origin.
    NewRow(NewRow),
    /// A peer acknowledged one of our writes.
    NewRowAck(NewRowAck),
    /// Retry timer fired.
    RetryNewRow(RetryNewRow),
}

/// Calls answered by the CRDT actor. All of them are local reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrdtRequest {
    /// Current value of a key.
    Get {
        /// Key to read.
        key: String,
    },
    /// Stored value of a key along with its clock and origin.
    Snapshot {
        /// Key to inspect.
        key: String,
    },
    /// The replica's own vector clock.
    Clock,
    /// Number of `(write, peer)` pairs still awaiting acknowledgment.
    PendingRetries,
}

/// Replies of the CRDT actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrdtResponse {
    /// Answer to [`CrdtRequest::Get`]; `None` means key not found.
    Value(Option<String>),
    /// Answer to [`CrdtRequest::Snapshot`].
    Snapshot(Option<CrdtRowValue>),
    /// Answer to [`CrdtRequest::Clock`].
    Clock(VectorClock),
    /// Answer to [`CrdtRequest::PendingRetries`].
    PendingRetries(usize),
}
