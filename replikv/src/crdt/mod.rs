//! Leaderless replication with vector clocks.
//!
//! | Module | Contents |
//! |---|---|
//! | [`clock`] | [`VectorClock`] and causal comparison |
//! | [`messages`] | Wire messages and actor calls |
//! | [`state`] | Pure replica state and conflict resolution |
//! | [`actor`] | [`CrdtActor`], reliable broadcast, [`CrdtHandle`] |

pub mod actor;
pub mod clock;
pub mod messages;
pub mod state;

pub use actor::{CrdtActor, CrdtHandle};
pub use clock::{ClockOrdering, VectorClock};
pub use messages::{CrdtMessage, CrdtRequest, CrdtResponse, CrdtRow, CrdtRowValue, NewRow, NewRowAck, RetryNewRow};
pub use state::{Applied, ReplicaState, TieBreak};
