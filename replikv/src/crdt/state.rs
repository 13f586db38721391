//! Replica state and last-writer-wins conflict resolution.
//!
//! [`ReplicaState`] is the pure part of the CRDT actor: it owns the clock and
//! the per-key values and decides, for every incoming row, whether it
//! replaces what is stored. It performs no I/O, so every delivery order can be
//! replayed deterministically in tests.
//!
//! ## Resolution table
//!
//! | stored vs incoming | outcome |
//! |---|---|
//! | no stored value | insert |
//! | `Before` | overwrite |
//! | `After` | keep (stale write) |
//! | `Equal`, same value and origin | keep (redelivery) |
//! | `Equal`, anything else | fatal invariant violation |
//! | `Conflict` | decided by [`TieBreak`] |

use std::cmp::Reverse;
use std::collections::HashMap;

use tracing::debug;

use crate::error::ActorFailure;
use crate::types::NodeId;

use super::clock::{ClockOrdering, VectorClock};
use super::messages::{CrdtRow, CrdtRowValue, NewRow};

/// How two concurrent writes to the same key are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TieBreak {
    /// The incoming write wins iff its origin id is lower than the id of the
    /// node evaluating the conflict.
    ///
    /// The outcome depends on which replica evaluates it and in which order
    /// rows arrive, so replicas can settle on different values.
    #[default]
    LocalThreshold,

    /// Writes are ranked by the sum of their clock, then by lower origin id.
    ///
    /// The ranking extends happens-before into a total order, so every replica
    /// keeps the same winner whatever the delivery order.
    CausalTotalOrder,
}

/// What applying a row did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The key had no value yet.
    Inserted,
    /// The row replaced the stored value.
    Overwritten,
    /// The stored value won; the row was discarded.
    Kept,
    /// The row was already applied.
    Duplicate,
}

/// Clock and data of one CRDT replica.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    node: NodeId,
    tie_break: TieBreak,
    clock: VectorClock,
    data: HashMap<String, CrdtRowValue>,
}

impl ReplicaState {
    /// Empty replica for `node` in a cluster of `node_count`.
    pub fn new(node: NodeId, node_count: u32, tie_break: TieBreak) -> Self {
        Self {
            node,
            tie_break,
            clock: VectorClock::new(node_count),
            data: HashMap::new(),
        }
    }

    /// Stamp and apply a write made on this node.
    ///
    /// Returns the message to broadcast to every peer.
    pub fn local_write(&mut self, key: String, value: String) -> Result<NewRow, ActorFailure> {
        self.clock.increment(self.node);
        let row = CrdtRow {
            key,
            value,
            timestamp: self.clock.clone(),
        };
        self.apply(self.node, &row)?;
        Ok(NewRow {
            from: self.node,
            row,
        })
    }

    /// Observe a row replicated by `origin`.
    ///
    /// The row's clock is merged into the local clock even when the write
    /// itself loses.
    pub fn receive(&mut self, origin: NodeId, row: &CrdtRow) -> Result<Applied, ActorFailure> {
        self.clock.merge(&row.timestamp);
        self.apply(origin, row)
    }

    /// Resolve `row` against the stored value of its key.
    pub fn apply(&mut self, origin: NodeId, row: &CrdtRow) -> Result<Applied, ActorFailure> {
        let incoming = CrdtRowValue {
            value: row.value.clone(),
            timestamp: row.timestamp.clone(),
            origin,
        };

        let Some(stored) = self.data.get(&row.key) else {
            self.data.insert(row.key.clone(), incoming);
            return Ok(Applied::Inserted);
        };

        let outcome = match stored.timestamp.compare(&row.timestamp) {
            ClockOrdering::Before => Applied::Overwritten,
            ClockOrdering::After => Applied::Kept,
            ClockOrdering::Equal if *stored == incoming => Applied::Duplicate,
            ClockOrdering::Equal => {
                return Err(ActorFailure::invariant(format!(
                    "distinct writes to key {:?} share clock {}",
                    row.key, row.timestamp
                )));
            }
            ClockOrdering::Conflict if self.incoming_wins(stored, &incoming) => {
                Applied::Overwritten
            }
            ClockOrdering::Conflict => Applied::Kept,
        };

        debug!(
            node = %self.node,
            key = %row.key,
            origin = %origin,
            timestamp = %row.timestamp,
            outcome = ?outcome,
            "applied row"
        );

        if outcome == Applied::Overwritten {
            self.data.insert(row.key.clone(), incoming);
        }
        Ok(outcome)
    }

    fn incoming_wins(&self, stored: &CrdtRowValue, incoming: &CrdtRowValue) -> bool {
        match self.tie_break {
            TieBreak::LocalThreshold => incoming.origin < self.node,
            TieBreak::CausalTotalOrder => {
                let rank = |v: &CrdtRowValue| (v.timestamp.sum(), Reverse(v.origin));
                rank(incoming) > rank(stored)
            }
        }
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|v| v.value.as_str())
    }

    /// Stored value of `key` with its provenance.
    pub fn snapshot(&self, key: &str) -> Option<&CrdtRowValue> {
        self.data.get(key)
    }

    /// The replica's clock.
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Id of the node owning this replica.
    pub fn node(&self) -> NodeId {
        self.node
    }
}
