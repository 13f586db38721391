//! Minimal actor runtime the replication actors are built on.
//!
//! The replication protocols need a few capabilities from their environment,
//! each provided by one module:
//!
//! | Capability | Module |
//! |---|---|
//! | Turn-based actors, send and call-with-timeout | [`actor`] |
//! | Restart with fresh state after a fatal failure | [`supervisor`] |
//! | Cancellable delayed self-messages | [`timer`] |
//! | Addressing peers by node id, in process or over TCP, with fault injection | [`network`] |
//! | JSON wire encoding | [`codec`] |
//!
//! Everything runs on Tokio: one task per actor, one task per pending timer,
//! one task per inbound peer connection.

pub mod actor;
pub mod codec;
pub mod network;
pub mod supervisor;
pub mod timer;

pub use actor::{Actor, ActorContext, ActorRef, Envelope, ReplyPromise, reply_channel};
pub use network::Network;
pub use supervisor::{RestartPolicy, spawn_supervised};
pub use timer::ScheduledTask;
