//! Pure consensus state of one Raft node.
//!
//! [`RaftState`] holds everything the protocol decides on and exposes one
//! method per protocol step. It performs no I/O and owns no timers: the actor
//! drives it, sends what it returns and applies the entries it hands back.
//!
//! ## Commit rule
//!
//! The leader tracks two positions per peer, both counted in entries:
//!
//! - `next`: where the next round starts. Unknown peers start at the leader's
//!   own log end, so their first round carries no entries.
//! - `matched`: how many entries the peer is known to share with the leader.
//!   Only an accepted round moves it, to the end of what that round covered.
//!
//! A rejected round moves `next` back to the position after the peer's commit
//! index, and at least one entry back, until the previous-entry check passes.
//!
//! Sorting `{leader log length} ∪ matched` in descending order, the value at
//! index `N / 2` is held by at least `N / 2 + 1` nodes, a strict majority.
//! Everything below it is committed, provided the entry at that position
//! belongs to the leader's term. The commit index never moves backwards.
//!
//! ## Follower rules
//!
//! A request from an older term is refused, and so is one whose `prev` entry
//! the follower does not hold. Accepted entries are merged by id:
//!
//! | incoming entry at `id` | action |
//! |---|---|
//! | identical to local | nothing |
//! | local entry has a lower term | overwrite, drop the local tail |
//! | local entry has a higher or equal term | fatal |
//! | `id == log length` | append |
//! | `id > log length` | fatal (gap) |
//!
//! The follower commits up to the leader's commit index, capped at the last
//! entry the request proved it shares with the leader.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ActorFailure, ClientError};
use crate::types::NodeId;

use super::messages::{AppendEntries, AppendEntriesResult, LogPosition, RequestVote};
use super::types::{LogEntry, RaftStatus, Role};

/// Volatile consensus state. Nothing survives a restart.
#[derive(Debug, Clone)]
pub struct RaftState {
    node: NodeId,
    node_count: u32,
    role: Role,
    term: u64,
    voted_for: Option<NodeId>,
    commit_index: Option<u64>,
    log: Vec<LogEntry>,
    /// Leader only: where each peer's next round starts.
    next: HashMap<NodeId, u64>,
    /// Leader only: number of entries each peer shares with the leader.
    matched: HashMap<NodeId, u64>,
}

impl RaftState {
    /// A follower at term 0 with an empty log.
    pub fn new(node: NodeId, node_count: u32) -> Self {
        Self {
            node,
            node_count,
            role: Role::Follower,
            term: 0,
            voted_for: None,
            commit_index: None,
            log: Vec::new(),
            next: HashMap::new(),
            matched: HashMap::new(),
        }
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current term.
    pub fn term(&self) -> u64 {
        self.term
    }

    /// Highest committed id.
    pub fn commit_index(&self) -> Option<u64> {
        self.commit_index
    }

    /// The log, committed prefix and uncommitted tail.
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Snapshot for introspection.
    pub fn status(&self) -> RaftStatus {
        RaftStatus {
            role: self.role,
            term: self.term,
            voted_for: self.voted_for,
            commit_index: self.commit_index,
            log_len: self.log.len(),
        }
    }

    fn last_index(&self) -> Option<u64> {
        (self.log.len() as u64).checked_sub(1)
    }

    fn position(&self, id: u64) -> Option<LogPosition> {
        self.log.get(id as usize).map(LogPosition::from)
    }

    // =========================================================================
    // Roles
    // =========================================================================

    /// Step down (or stay) as follower.
    pub fn become_follower(&mut self) {
        self.role = Role::Follower;
        self.next.clear();
        self.matched.clear();
    }

    /// Take leadership after a won election.
    pub fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.next.clear();
        self.matched.clear();
    }

    /// Enter a new term as candidate, voting for itself.
    pub fn start_election(&mut self) -> RequestVote {
        self.role = Role::Candidate;
        self.term += 1;
        self.voted_for = Some(self.node);
        self.next.clear();
        self.matched.clear();
        RequestVote {
            term: self.term,
            commit_index: self.commit_index,
            candidate: self.node,
        }
    }

    /// Whether `granted` peer votes win the election.
    ///
    /// Failed or missing answers count against the candidate.
    pub fn election_won(&self, granted: usize) -> bool {
        let peers = self.node_count.saturating_sub(1) as usize;
        let votes = granted + 1;
        let against = peers.saturating_sub(granted);
        votes > against
    }

    /// Adopt `term` if it is newer than ours, stepping down to follower.
    ///
    /// Returns whether the term changed.
    pub fn observe_term(&mut self, term: u64) -> bool {
        if term <= self.term {
            return false;
        }
        debug!(node = %self.node, old_term = self.term, term, "adopting newer term");
        self.term = term;
        self.voted_for = None;
        self.become_follower();
        true
    }

    // =========================================================================
    // Voter
    // =========================================================================

    /// Decide on a vote request.
    ///
    /// Granted iff the candidate's term is newer than ours and its commit
    /// index is at least ours. Granting adopts the term and makes this node a
    /// follower; the caller re-arms the election timer.
    pub fn handle_request_vote(&mut self, request: &RequestVote) -> bool {
        if request.term <= self.term || request.commit_index < self.commit_index {
            debug!(
                node = %self.node,
                candidate = %request.candidate,
                term = request.term,
                own_term = self.term,
                "vote refused"
            );
            return false;
        }
        self.term = request.term;
        self.voted_for = Some(request.candidate);
        self.become_follower();
        true
    }

    // =========================================================================
    // Follower
    // =========================================================================

    /// Check a leader's round, merge its entries, then advance the commit
    /// index.
    ///
    /// Returns the answer for the leader and the newly committed entries, in
    /// id order, for the caller to apply.
    pub fn handle_append_entries(
        &mut self,
        request: &AppendEntries,
    ) -> Result<(AppendEntriesResult, Vec<LogEntry>), ActorFailure> {
        if request.term < self.term {
            debug!(
                node = %self.node,
                leader = %request.leader,
                term = request.term,
                own_term = self.term,
                "refusing entries from an older term"
            );
            return Ok((self.append_result(false), Vec::new()));
        }
        self.observe_term(request.term);
        self.become_follower();

        if let Some(prev) = request.prev {
            if self.position(prev.id) != Some(prev) {
                debug!(
                    node = %self.node,
                    leader = %request.leader,
                    prev_id = prev.id,
                    prev_term = prev.term,
                    log_len = self.log.len(),
                    "previous entry missing"
                );
                return Ok((self.append_result(false), Vec::new()));
            }
        }

        for entry in &request.entries {
            self.merge_entry(entry)?;
        }

        let shared = request
            .entries
            .last()
            .map(|entry| entry.id)
            .or(request.prev.map(|prev| prev.id));
        let target = request.commit_index.min(shared);
        let committed = if target < self.commit_index {
            debug!(
                node = %self.node,
                leader_commit = ?request.commit_index,
                commit = ?self.commit_index,
                "ignoring commit index behind our own"
            );
            Vec::new()
        } else {
            self.commit_to(target)?
        };
        Ok((self.append_result(true), committed))
    }

    fn append_result(&self, accepted: bool) -> AppendEntriesResult {
        AppendEntriesResult {
            term: self.term,
            accepted,
            commit_index: self.commit_index,
        }
    }

    fn merge_entry(&mut self, entry: &LogEntry) -> Result<(), ActorFailure> {
        let len = self.log.len() as u64;
        if entry.id == len {
            self.log.push(entry.clone());
            return Ok(());
        }
        if entry.id > len {
            return Err(ActorFailure::invariant(format!(
                "entry {} leaves a gap after log end {}",
                entry.id, len
            )));
        }

        let slot = entry.id as usize;
        let existing = &self.log[slot];
        if existing == entry {
            return Ok(());
        }
        if existing.term < entry.term {
            if self.commit_index.is_some_and(|commit| entry.id <= commit) {
                return Err(ActorFailure::invariant(format!(
                    "entry {} is committed and cannot be replaced",
                    entry.id
                )));
            }
            debug!(node = %self.node, id = entry.id, old_term = existing.term, new_term = entry.term, "overwriting entry");
            self.log.truncate(slot);
            self.log.push(entry.clone());
            return Ok(());
        }
        Err(ActorFailure::invariant(format!(
            "entry {} from term {} conflicts with local entry from term {}",
            entry.id, entry.term, existing.term
        )))
    }

    // =========================================================================
    // Leader
    // =========================================================================

    /// Append a client write at the end of the log.
    ///
    /// Returns the id the entry was appended at.
    pub fn append_client(
        &mut self,
        key: String,
        value: String,
        tombstone: bool,
    ) -> Result<u64, ClientError> {
        if self.role != Role::Leader {
            return Err(ClientError::NotLeader);
        }
        let id = self.log.len() as u64;
        self.log.push(LogEntry {
            id,
            term: self.term,
            key,
            value,
            tombstone,
        });
        Ok(id)
    }

    /// The next round for `peer`, carrying at most `batch` entries.
    ///
    /// Empty for a peer whose position is unknown.
    pub fn append_request(&self, peer: NodeId, batch: usize) -> AppendEntries {
        let len = self.log.len();
        let start = self
            .next
            .get(&peer)
            .map_or(len, |&next| (next as usize).min(len));
        let end = start.saturating_add(batch).min(len);
        AppendEntries {
            term: self.term,
            leader: self.node,
            prev: (start as u64).checked_sub(1).and_then(|id| self.position(id)),
            entries: self.log[start..end].to_vec(),
            commit_index: self.commit_index,
        }
    }

    /// Record `peer`'s answer to `request`.
    ///
    /// Returns `false` when the answer carries a newer term; this node is a
    /// follower from then on.
    pub fn record_reply(
        &mut self,
        peer: NodeId,
        request: &AppendEntries,
        reply: &AppendEntriesResult,
    ) -> bool {
        if self.observe_term(reply.term) {
            return false;
        }
        let start = request.prev.map_or(0, |prev| prev.id + 1);
        if reply.accepted {
            let shared = start + request.entries.len() as u64;
            self.next.insert(peer, shared);
            self.matched.insert(peer, shared);
            return true;
        }

        let retry = reply
            .commit_index
            .map_or(0, |commit| commit + 1)
            .min(start.saturating_sub(1));
        debug!(node = %self.node, peer = %peer, from = start, retry, "peer rejected round");
        self.next.insert(peer, retry);
        if let Some(matched) = self.matched.get_mut(&peer) {
            *matched = (*matched).min(retry);
        }
        true
    }

    /// Forget what `peer` holds; its next round starts over at the log end.
    pub fn forget_peer(&mut self, peer: NodeId) {
        self.next.remove(&peer);
        self.matched.remove(&peer);
    }

    /// Highest id held by a strict majority, counting the leader itself.
    pub fn majority_index(&self) -> Option<u64> {
        let mut held: Vec<u64> = NodeId::all(self.node_count)
            .map(|id| {
                if id == self.node {
                    self.log.len() as u64
                } else {
                    self.matched.get(&id).copied().unwrap_or(0)
                }
            })
            .collect();
        held.sort_unstable_by(|a, b| b.cmp(a));
        held.get(self.node_count as usize / 2)
            .and_then(|count| count.checked_sub(1))
    }

    /// Advance the leader's commit index to the majority position.
    ///
    /// Entries of earlier terms are committed only along with one of the
    /// current term. Returns the newly committed entries.
    pub fn advance_leader_commit(&mut self) -> Result<Vec<LogEntry>, ActorFailure> {
        let target = self
            .majority_index()
            .filter(|&id| self.position(id).is_some_and(|at| at.term == self.term));
        if target <= self.commit_index {
            return Ok(Vec::new());
        }
        self.commit_to(target)
    }

    fn commit_to(&mut self, target: Option<u64>) -> Result<Vec<LogEntry>, ActorFailure> {
        if target < self.commit_index {
            return Err(ActorFailure::invariant(format!(
                "commit index would move back from {:?} to {:?}",
                self.commit_index, target
            )));
        }
        let Some(target) = target else {
            return Ok(Vec::new());
        };
        let start = self.commit_index.map_or(0, |c| c + 1) as usize;
        let end = target as usize + 1;
        let committed = self.log.get(start..end).map(<[LogEntry]>::to_vec).ok_or_else(|| {
            ActorFailure::invariant(format!(
                "commit index {} beyond log end {}",
                target,
                self.log.len()
            ))
        })?;
        self.commit_index = Some(target);
        Ok(committed)
    }
}
