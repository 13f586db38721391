//! # replikv: a replicated key-value store
//!
//! A fixed cluster of `N` nodes keeps a key-value mapping consistent using
//! one of two replication strategies, selected per cluster:
//!
//! | Strategy | Module | Writes accepted by | Reads see |
//! |---|---|---|---|
//! | Vector-clock CRDT | [`crdt`] | any node, immediately | local replica, eventually consistent |
//! | Raft-style log | [`raft`] | the leader, after majority commit | applied state of the node |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               HTTP façade (axum)            │
//! └───────────────┬─────────────────────────────┘
//!                 │ CrdtHandle / RaftHandle
//!                 ▼
//! ┌─────────────────────────────┐      ┌──────────────────┐
//! │ CrdtActor  |  RaftActor     │─────►│  StorageActor    │ (Raft only)
//! └───────────────┬─────────────┘      └──────────────────┘
//!                 │ Network<A>: JSON over in-process mailboxes or TCP
//!                 ▼
//!          peers on node-1 .. node-N
//! ```
//!
//! Every actor runs under a supervisor: a protocol invariant violation
//! restarts it with fresh, empty state. Nothing is persisted.
//!
//! ## Crate Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`runtime`] | Actors, supervision, timers, peer network |
//! | [`crdt`] | Vector clocks, conflict resolution, reliable broadcast |
//! | [`raft`] | Election, log replication, commit |
//! | [`storage`] | Flat key-value actor |
//! | [`http`] | REST façade |
//! | [`node`] | Node and cluster bootstrap |
//! | [`config`] | [`ClusterConfig`] and its builder |
//! | [`error`] | Error types per layer |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod crdt;
pub mod error;
pub mod http;
pub mod node;
pub mod raft;
pub mod runtime;
pub mod storage;
pub mod types;

pub use config::{ClusterConfig, ClusterConfigBuilder, CrdtSettings, RaftSettings, ReplicationMode};
pub use crdt::{CrdtHandle, TieBreak, VectorClock};
pub use error::{ActorFailure, ClientError, ConfigError, StartupError, TransportError};
pub use http::{ApiError, crdt_router, raft_router};
pub use node::{CrdtCluster, RaftCluster, start_crdt_process, start_raft_process};
pub use raft::{RaftHandle, RaftStatus, Role};
pub use storage::Storage;
pub use types::NodeId;
