//! Per-peer replication progress, maintained only while this server is
//! leader (spec.md §4.3).

use std::collections::BTreeMap;

use crate::raft_types::Index;
use crate::raft_types::Term;
use crate::ServerId;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReplicationMode {
    /// Sending one entry at a time, waiting for a success before advancing.
    /// The safe starting state for a peer whose log we don't yet know.
    Probe,
    /// Sending a full pipeline of outstanding batches without waiting for
    /// each to be acknowledged.
    Pipeline,
    /// The peer is too far behind for incremental replication; it is
    /// receiving `InstallSnapshot` chunks instead.
    Snapshot,
}

/// Replication bookkeeping for a single peer.
#[derive(Debug, Clone)]
pub struct Progress {
    pub next_index: Index,
    pub match_index: Index,
    pub match_term: Term,
    pub mode: ReplicationMode,
    pub last_send_ms: Option<u64>,
    pub last_recv_ms: Option<u64>,
    /// Set while `mode == Snapshot`: the watermark of the snapshot being
    /// streamed and the byte offset of the next chunk.
    pub snapshot_index: Option<Index>,
    pub snapshot_offset: usize,
    /// Outstanding (unacknowledged) `AppendEntries` batches, used to cap
    /// pipeline depth in `Pipeline` mode.
    pub inflight: usize,
}

impl Progress {
    pub fn new(next_index: Index) -> Self {
        Progress {
            next_index,
            match_index: 0,
            match_term: 0,
            mode: ReplicationMode::Probe,
            last_send_ms: None,
            last_recv_ms: None,
            snapshot_index: None,
            snapshot_offset: 0,
            inflight: 0,
        }
    }

    /// Transition after a successful `AppendEntriesResult`: record the new
    /// match point and move from `Probe` into `Pipeline`. `term` is the
    /// leader's own term for the entry at `last_sent_index` (mirroring
    /// `async-raft`'s `match_term: self.core.current_term`) — without it
    /// every peer would contribute a `0` term to the commit-index quorum
    /// vector, which only happens to look correct when the leader's own
    /// entry lands exactly at the median slot.
    pub fn record_append_success(&mut self, last_sent_index: Index, term: Term) {
        if last_sent_index >= self.match_index {
            self.match_index = last_sent_index;
            self.match_term = term;
        }
        self.next_index = self.next_index.max(last_sent_index + 1);
        if self.mode == ReplicationMode::Probe {
            self.mode = ReplicationMode::Pipeline;
        }
        self.inflight = self.inflight.saturating_sub(1);
    }

    /// Transition after a rejected `AppendEntriesResult`: fall back to probe
    /// and rewind `next_index` using the follower's conflict hint.
    pub fn record_append_rejected(&mut self, conflict_index: Index, conflict_term: Term, local_term_of: impl Fn(Index) -> Term) {
        self.mode = ReplicationMode::Probe;
        self.inflight = 0;
        if conflict_term == 0 {
            self.next_index = conflict_index.max(1);
            return;
        }
        // The leader owns an entry at conflict_term: retry just past it.
        // Otherwise skip the whole conflicting term as the hint intends.
        let mut idx = conflict_index;
        if local_term_of(idx) == conflict_term {
            while local_term_of(idx + 1) == conflict_term {
                idx += 1;
            }
            self.next_index = idx + 1;
        } else {
            self.next_index = conflict_index.max(1);
        }
    }

    pub fn enter_snapshot(&mut self, snapshot_index: Index) {
        self.mode = ReplicationMode::Snapshot;
        self.snapshot_index = Some(snapshot_index);
        self.snapshot_offset = 0;
    }

    pub fn record_snapshot_success(&mut self, snapshot_index: Index, snapshot_term: Term) {
        self.mode = ReplicationMode::Probe;
        self.snapshot_index = None;
        self.snapshot_offset = 0;
        self.next_index = snapshot_index + 1;
        self.match_index = snapshot_index;
        self.match_term = snapshot_term;
    }

    pub fn is_up_to_date(&self, leader_last_index: Index) -> bool {
        self.match_index >= leader_last_index
    }
}

/// The set of per-peer `Progress` entries a leader maintains, keyed by
/// server id in a `BTreeMap` so iteration order — and therefore the order
/// tasks are emitted in — is deterministic (spec.md §4.1 Determinism).
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    peers: BTreeMap<ServerId, Progress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker::default()
    }

    pub fn ensure(&mut self, id: ServerId, next_index: Index) -> &mut Progress {
        self.peers.entry(id).or_insert_with(|| Progress::new(next_index))
    }

    pub fn get(&self, id: ServerId) -> Option<&Progress> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: ServerId) -> Option<&mut Progress> {
        self.peers.get_mut(&id)
    }

    pub fn remove(&mut self, id: ServerId) {
        self.peers.remove(&id);
    }

    pub fn retain_only(&mut self, ids: &std::collections::BTreeSet<ServerId>) {
        self.peers.retain(|id, _| ids.contains(id));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ServerId, &Progress)> {
        self.peers.iter()
    }

    /// The lowest `next_index` of any tracked peer: the floor below which
    /// the log must not be compacted without first snapshot-installing that
    /// peer (spec.md §4.2).
    pub fn min_next_index(&self) -> Option<Index> {
        self.peers.values().map(|p| p.next_index).min()
    }

    pub fn should_transition_to_snapshot(&self, id: ServerId, snapshot_last_index: Index) -> bool {
        match self.peers.get(&id) {
            Some(p) => p.mode != ReplicationMode::Snapshot && p.next_index <= snapshot_last_index,
            None => false,
        }
    }
}
