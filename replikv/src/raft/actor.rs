//! The Raft actor: timers, RPC fan-out, storage application.
//!
//! ```text
//!             ElectionTimeout                 won
//!  Follower ──────────────────► Candidate ─────────► Leader
//!     ▲                             │ lost              │
//!     ├─────────────────────────────┘                   │
//!     └──── AppendEntries received / vote granted ◄─────┘
//! ```
//!
//! The actor is the only owner of [`RaftState`]. Every handler runs to
//! completion, including the RPCs it issues: while a candidate waits for its
//! votes or a leader walks its peers, incoming calls queue up.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::error::{ActorFailure, ClientError, TransportError};
use crate::runtime::{Actor, ActorContext, ActorRef, Network, ReplyPromise, ScheduledTask};
use crate::storage::Storage;
use crate::types::NodeId;

use super::messages::{
    AddEntry, AppendEntries, AppendEntriesResult, RaftMessage, RaftRequest, RaftResponse,
    RequestVote, WriteOutcome,
};
use super::state::RaftState;
use super::types::{LogEntry, RaftStatus, Role};

/// A client write waiting for its entry to be applied.
#[derive(Debug)]
pub struct PendingClientRequest {
    reply: ReplyPromise<RaftResponse>,
    id: u64,
    term: u64,
}

/// Leader-based replication actor of one node.
pub struct RaftActor {
    config: ClusterConfig,
    network: Network<RaftActor>,
    storage: Storage,
    state: RaftState,
    pending: VecDeque<PendingClientRequest>,
    election_timer: Option<ScheduledTask>,
    election_epoch: u64,
    heartbeat_timer: Option<ScheduledTask>,
    heartbeat_epoch: u64,
}

impl RaftActor {
    /// Fresh follower for the node described by `config`.
    pub fn new(config: ClusterConfig, network: Network<RaftActor>, storage: Storage) -> Self {
        let state = RaftState::new(config.node_id(), config.node_count());
        Self {
            config,
            network,
            storage,
            state,
            pending: VecDeque::new(),
            election_timer: None,
            election_epoch: 0,
            heartbeat_timer: None,
            heartbeat_epoch: 0,
        }
    }

    fn id(&self) -> NodeId {
        self.config.node_id()
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn election_delay(&self) -> Duration {
        let settings = self.config.raft();
        let jitter_ms = settings.election_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return settings.election_timeout;
        }
        settings.election_timeout + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }

    fn arm_election_timer(&mut self, ctx: &ActorContext<Self>) {
        self.election_epoch += 1;
        let message = RaftMessage::ElectionTimeout {
            epoch: self.election_epoch,
        };
        self.election_timer = Some(ctx.send_after(message, self.election_delay()));
    }

    fn cancel_election_timer(&mut self) {
        self.election_epoch += 1;
        self.election_timer = None;
    }

    fn arm_heartbeat(&mut self, ctx: &ActorContext<Self>, delay: Duration) {
        self.heartbeat_epoch += 1;
        let message = RaftMessage::HeartbeatTick {
            epoch: self.heartbeat_epoch,
        };
        self.heartbeat_timer = Some(ctx.send_after(message, delay));
    }

    fn cancel_heartbeat(&mut self) {
        self.heartbeat_epoch += 1;
        self.heartbeat_timer = None;
    }

    /// Leader contact, a granted vote or a newer term: follow, and wait for
    /// the leader.
    fn follow(&mut self, ctx: &ActorContext<Self>) {
        if self.state.role() == Role::Leader {
            info!(node = %self.id(), term = self.state.term(), "stepping down");
        }
        self.state.become_follower();
        self.cancel_heartbeat();
        self.arm_election_timer(ctx);
    }

    // =========================================================================
    // Election
    // =========================================================================

    async fn run_election(&mut self, ctx: &ActorContext<Self>) {
        let request = self.state.start_election();
        info!(node = %self.id(), term = request.term, "starting election");

        let timeout = self.config.raft().call_timeout;
        let id = self.id();
        let peers: Vec<NodeId> = self.config.peers().collect();
        let calls = peers.iter().map(|&peer| {
            let request = RaftRequest::RequestVote(request.clone());
            let network = &self.network;
            async move { (peer, network.call(id, peer, &request, timeout).await) }
        });

        let mut granted = 0;
        for (peer, outcome) in join_all(calls).await {
            match outcome {
                Ok(RaftResponse::Vote(true)) => granted += 1,
                Ok(RaftResponse::Vote(false)) => debug!(node = %id, peer = %peer, "vote refused"),
                Ok(other) => warn!(node = %id, peer = %peer, reply = ?other, "unexpected vote reply"),
                Err(err) => debug!(node = %id, peer = %peer, error = %err, "vote request failed"),
            }
        }

        if self.state.election_won(granted) {
            info!(node = %id, term = request.term, votes = granted + 1, "elected leader");
            self.state.become_leader();
            self.cancel_election_timer();
            self.arm_heartbeat(ctx, Duration::ZERO);
        } else {
            info!(node = %id, term = request.term, votes = granted + 1, "election lost");
            self.state.become_follower();
            self.arm_election_timer(ctx);
        }
    }

    // =========================================================================
    // Replication
    // =========================================================================

    async fn replicate(&mut self, ctx: &ActorContext<Self>) -> Result<(), ActorFailure> {
        let id = self.id();
        let timeout = self.config.raft().call_timeout;
        let batch = self.config.raft().append_batch_size;
        let peers: Vec<NodeId> = self.config.peers().collect();

        for peer in peers {
            let request = self.state.append_request(peer, batch);
            let call = RaftRequest::AppendEntries(request.clone());

            match self.network.call(id, peer, &call, timeout).await {
                Ok(RaftResponse::Appended(reply)) => {
                    if !self.state.record_reply(peer, &request, &reply) {
                        info!(node = %id, peer = %peer, term = reply.term, "peer is in a newer term");
                        self.follow(ctx);
                        return Ok(());
                    }
                }
                Ok(other) => {
                    warn!(node = %id, peer = %peer, reply = ?other, "unexpected append reply");
                    self.state.forget_peer(peer);
                }
                Err(err) => {
                    warn!(node = %id, peer = %peer, error = %err, "append entries failed");
                    self.state.forget_peer(peer);
                }
            }
        }

        let committed = self.state.advance_leader_commit()?;
        self.apply(committed).await
    }

    /// Apply committed entries to storage in id order, answering clients.
    async fn apply(&mut self, entries: Vec<LogEntry>) -> Result<(), ActorFailure> {
        for entry in entries {
            let applied = if entry.tombstone {
                self.storage.delete(&entry.key).await
            } else {
                self.storage.set(&entry.key, &entry.value).await
            };
            applied.map_err(ActorFailure::StorageUnavailable)?;
            info!(
                node = %self.id(),
                id = entry.id,
                term = entry.term,
                key = %entry.key,
                tombstone = entry.tombstone,
                "applied entry"
            );
            self.answer_pending(&entry);
        }
        Ok(())
    }

    fn answer_pending(&mut self, entry: &LogEntry) {
        while let Some(front) = self.pending.front() {
            if front.id > entry.id {
                break;
            }
            let Some(pending) = self.pending.pop_front() else {
                break;
            };
            let outcome = if pending.id == entry.id && pending.term == entry.term {
                WriteOutcome::Committed { id: pending.id }
            } else {
                warn!(node = %self.id(), id = pending.id, term = pending.term, "client write superseded");
                WriteOutcome::Superseded { id: pending.id }
            };
            pending.reply.send(RaftResponse::Write(outcome));
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn on_request_vote(&mut self, ctx: &ActorContext<Self>, request: &RequestVote) -> bool {
        let granted = self.state.handle_request_vote(request);
        if granted {
            info!(node = %self.id(), candidate = %request.candidate, term = request.term, "vote granted");
            self.follow(ctx);
        }
        granted
    }

    async fn on_append_entries(
        &mut self,
        ctx: &ActorContext<Self>,
        request: &AppendEntries,
    ) -> Result<AppendEntriesResult, ActorFailure> {
        if request.term >= self.state.term() {
            self.follow(ctx);
        }
        let (result, committed) = self.state.handle_append_entries(request)?;
        self.apply(committed).await?;
        Ok(result)
    }

    fn on_add_entry(&mut self, entry: AddEntry, reply: ReplyPromise<RaftResponse>) {
        match self
            .state
            .append_client(entry.key, entry.value, entry.tombstone)
        {
            Ok(id) => {
                debug!(node = %self.id(), id, "client write appended");
                self.pending.push_back(PendingClientRequest {
                    reply,
                    id,
                    term: self.state.term(),
                });
            }
            Err(_) => {
                debug!(node = %self.id(), role = %self.state.role(), "rejecting write on non-leader");
                reply.send(RaftResponse::Write(WriteOutcome::NotLeader));
            }
        }
    }
}

#[async_trait]
impl Actor for RaftActor {
    type Message = RaftMessage;
    type Request = RaftRequest;
    type Response = RaftResponse;

    async fn init(&mut self, ctx: &ActorContext<Self>) -> Result<(), ActorFailure> {
        info!(actor = ctx.name(), node = %self.id(), "raft replica ready");
        self.arm_election_timer(ctx);
        Ok(())
    }

    async fn handle_message(
        &mut self,
        ctx: &ActorContext<Self>,
        message: RaftMessage,
    ) -> Result<(), ActorFailure> {
        match message {
            RaftMessage::ElectionTimeout { epoch } => {
                if epoch != self.election_epoch || self.state.role() == Role::Leader {
                    debug!(node = %self.id(), epoch, "stale election timeout");
                    return Ok(());
                }
                self.election_timer = None;
                self.run_election(ctx).await;
            }
            RaftMessage::HeartbeatTick { epoch } => {
                if epoch != self.heartbeat_epoch || self.state.role() != Role::Leader {
                    debug!(node = %self.id(), epoch, "stale heartbeat");
                    return Ok(());
                }
                self.replicate(ctx).await?;
                if self.state.role() == Role::Leader {
                    let interval = self.config.raft().heartbeat_interval;
                    self.arm_heartbeat(ctx, interval);
                }
            }
        }
        Ok(())
    }

    async fn handle_call(
        &mut self,
        ctx: &ActorContext<Self>,
        request: RaftRequest,
        reply: ReplyPromise<RaftResponse>,
    ) -> Result<(), ActorFailure> {
        match request {
            RaftRequest::RequestVote(vote) => {
                let granted = self.on_request_vote(ctx, &vote);
                reply.send(RaftResponse::Vote(granted));
            }
            RaftRequest::AppendEntries(append) => {
                let result = self.on_append_entries(ctx, &append).await?;
                reply.send(RaftResponse::Appended(result));
            }
            RaftRequest::AddEntry(entry) => self.on_add_entry(entry, reply),
            RaftRequest::Status => reply.send(RaftResponse::Status(self.state.status())),
        }
        Ok(())
    }
}

/// Typed client of a local [`RaftActor`] and its storage.
#[derive(Debug, Clone)]
pub struct RaftHandle {
    actor: ActorRef<RaftActor>,
    storage: Storage,
    timeout: Duration,
}

impl RaftHandle {
    /// Wrap `actor`; writes wait at most `timeout` for their commit.
    pub fn new(actor: ActorRef<RaftActor>, storage: Storage, timeout: Duration) -> Self {
        Self {
            actor,
            storage,
            timeout,
        }
    }

    /// Read `key` from the node's storage: committed writes only.
    pub async fn get(&self, key: &str) -> Result<Option<String>, TransportError> {
        self.storage.get(key).await
    }

    /// Replicate a write; resolves once it is committed and applied.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<u64, ClientError> {
        self.submit(AddEntry {
            key: key.into(),
            value: value.into(),
            tombstone: false,
        })
        .await
    }

    /// Replicate a delete; resolves once it is committed and applied.
    pub async fn delete(&self, key: impl Into<String>) -> Result<u64, ClientError> {
        self.submit(AddEntry {
            key: key.into(),
            value: String::new(),
            tombstone: true,
        })
        .await
    }

    /// Consensus state of the node.
    pub async fn status(&self) -> Result<RaftStatus, TransportError> {
        match self.actor.call(RaftRequest::Status, self.timeout).await? {
            RaftResponse::Status(status) => Ok(status),
            _ => Err(self.unexpected()),
        }
    }

    async fn submit(&self, entry: AddEntry) -> Result<u64, ClientError> {
        match self
            .actor
            .call(RaftRequest::AddEntry(entry), self.timeout)
            .await?
        {
            RaftResponse::Write(WriteOutcome::Committed { id }) => Ok(id),
            RaftResponse::Write(WriteOutcome::NotLeader) => Err(ClientError::NotLeader),
            RaftResponse::Write(WriteOutcome::Superseded { id }) => Err(ClientError::Superseded { id }),
            _ => Err(self.unexpected().into()),
        }
    }

    fn unexpected(&self) -> TransportError {
        TransportError::UnexpectedReply(self.actor.name().to_string())
    }
}
