//! The consensus state machine: the central transducer described in
//! spec.md §4.1. [`ConsensusState::step`] is the crate's only entry point.

mod candidate;
mod follower;
mod leader;
mod membership_change;
mod replication;
mod snapshot;
mod transfer;

use std::collections::VecDeque;

use tracing::trace;

use crate::client::ClientRequestRegistry;
use crate::config::Config;
use crate::election::ElectionTracker;
use crate::entry::Entry;
use crate::entry::EntryPayload;
use crate::error::RaftError;
use crate::event::Event;
use crate::log::Log;
use crate::membership::Membership;
use crate::progress::ProgressTracker;
use crate::raft_types::Index;
use crate::raft_types::LogId;
use crate::raft_types::Term;
use crate::task::Task;
use crate::task::TaskQueue;
use crate::ServerId;

pub(crate) use transfer::TransferState;

/// The role a server currently occupies.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
    /// A fatal collaborator error (spec.md §7 `IO_ERROR` on a durable write)
    /// has occurred; the instance no longer participates and every pending
    /// request has been failed with `SHUTDOWN`.
    Stopped,
}

/// A follower's record of an in-flight `AppendEntries` it has queued for
/// persistence but not yet acknowledged, so the reply can be sent only once
/// the entries are durable (spec.md §5: entries must be durable before they
/// count toward replication progress; generalized here to the follower side
/// for the same safety reason — an acked-but-unpersisted entry that is lost
/// on restart would violate Leader Completeness).
#[derive(Debug, Clone)]
pub(crate) struct PendingAck {
    pub first_index: Index,
    pub last_index: Index,
    pub term: Term,
    pub leader_commit: Index,
}

/// The consensus state machine. Owns every component listed in spec.md §2:
/// the log, membership, progress tracker, election tracker, task queue and
/// client-request registry all live here by value, avoiding the cyclic
/// ownership the design notes (spec.md §9) call out.
pub struct ConsensusState {
    pub id: ServerId,
    pub config: Config,

    pub current_term: Term,
    pub voted_for: Option<ServerId>,
    pub role: Role,
    pub leader_id: Option<ServerId>,

    pub commit_index: Index,
    pub last_applied: Index,

    pub(crate) election_elapsed_ms: u64,
    pub(crate) election_timeout_ms: u64,
    pub(crate) heartbeat_elapsed_ms: u64,

    pub log: Log,
    /// Highest index this server has itself durably persisted. Distinct
    /// from `log.last_index()`, which includes entries appended but not
    /// yet acknowledged by a `PERSISTED_ENTRIES` event.
    pub(crate) persisted_index: Index,

    pub membership: Membership,
    /// The configuration in effect at or before `log.snapshot_last_index()`
    /// — the floor `recompute_membership` falls back to when no
    /// `Configuration` entry remains in the in-memory log window.
    pub(crate) base_membership: Membership,
    /// Gate on single-in-flight membership changes (spec.md §4.1): the
    /// index of the one uncommitted `CONFIGURATION` entry, if any.
    pub(crate) configuration_uncommitted_index: Option<Index>,

    pub progress: ProgressTracker,
    pub(crate) election: Option<ElectionTracker>,

    pub clients: ClientRequestRegistry,
    pub(crate) tasks: TaskQueue,

    pub(crate) pending_acks: VecDeque<PendingAck>,
    pub(crate) transfer: Option<TransferState>,
    pub(crate) incoming_snapshot: Option<snapshot::IncomingSnapshot>,
    pub(crate) pending_snapshot_loads: Vec<snapshot::PendingLoad>,
    /// Set while a `TakeSnapshot` task is outstanding, so `maybe_request_snapshot`
    /// doesn't ask the FSM for a second one before the first completes.
    pub(crate) snapshot_requested_index: Option<Index>,

    fatal_error: Option<RaftError>,
}

impl ConsensusState {
    /// Create a fresh instance bootstrapped as the sole voter of `membership`
    /// (or, if `membership` already names other voters, as a follower
    /// awaiting contact — the host is responsible for restoring
    /// `current_term`/`voted_for`/the log/membership from durable state
    /// before the first `step` call on a restarted instance).
    pub fn new(id: ServerId, config: Config, membership: Membership) -> Self {
        ConsensusState {
            id,
            config,
            current_term: 0,
            voted_for: None,
            role: Role::Follower,
            leader_id: None,
            commit_index: 0,
            last_applied: 0,
            election_elapsed_ms: 0,
            election_timeout_ms: 0,
            heartbeat_elapsed_ms: 0,
            log: Log::new(),
            persisted_index: 0,
            membership: membership.clone(),
            base_membership: membership,
            configuration_uncommitted_index: None,
            progress: ProgressTracker::new(),
            election: None,
            clients: ClientRequestRegistry::new(),
            tasks: TaskQueue::new(),
            pending_acks: VecDeque::new(),
            transfer: None,
            incoming_snapshot: None,
            pending_snapshot_loads: Vec::new(),
            snapshot_requested_index: None,
            fatal_error: None,
        }
    }

    /// Restore a previously-persisted `(term, voted_for)` pair. Intended to
    /// be called once, by the host, before the first `step`.
    pub fn restore_hard_state(&mut self, term: Term, voted_for: Option<ServerId>) {
        self.current_term = term;
        self.voted_for = voted_for;
    }

    /// Restore a previously-persisted log window. Intended to be called
    /// once, by the host, before the first `step`.
    pub fn restore_log(&mut self, log: Log, persisted_index: Index) {
        self.log = log;
        self.persisted_index = persisted_index;
        self.recompute_membership();
    }

    /// Recompute the effective membership by scanning the in-memory log
    /// backward for the latest `Configuration` entry (after
    /// `memstore::MemStore::get_membership_from_log` in the teacher crate),
    /// falling back to `base_membership` when none remains in the window.
    /// A `Configuration` entry's joint (old-voter) half is only honored
    /// while the entry itself is uncommitted — once `commit_index` reaches
    /// it, the change is "promoted" and only the new voter set matters
    /// (spec.md §4.1 Membership change).
    pub(crate) fn recompute_membership(&mut self) {
        let last = self.log.last_index();
        let first = self.log.first_in_memory_index().unwrap_or(last + 1);
        let mut found: Option<(Index, Membership)> = None;
        let mut idx = last;
        while idx >= first && idx > 0 {
            if let Some(entry) = self.log.get(idx) {
                if let EntryPayload::Configuration(m) = &entry.payload {
                    found = Some((idx, m.clone()));
                    break;
                }
            }
            idx -= 1;
        }

        self.membership = match found {
            Some((entry_index, m)) => {
                if entry_index <= self.commit_index {
                    if self.configuration_uncommitted_index == Some(entry_index) {
                        self.configuration_uncommitted_index = None;
                    }
                    m.leave_joint()
                } else {
                    m
                }
            }
            None => self.base_membership.clone(),
        };
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn metrics(&self) -> crate::metrics::RaftMetrics {
        let replication = if self.is_leader() {
            self.progress
                .iter()
                .map(|(id, p)| (*id, crate::metrics::ReplicationMetrics { matched: LogId::new(p.match_term, p.match_index) }))
                .collect()
        } else {
            Default::default()
        };
        crate::metrics::RaftMetrics {
            id: self.id,
            current_term: self.current_term,
            role: self.role,
            leader_id: self.leader_id,
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            last_log_index: self.log.last_index(),
            replication,
        }
    }

    /// The single entry point: consume one event, produce the tasks it
    /// causes. Never blocks, never performs I/O, never reads a clock or a
    /// random source (spec.md §4.1 Determinism).
    #[tracing::instrument(level = "trace", skip(self, event), fields(id = self.id, term = self.current_term))]
    pub fn step(&mut self, event: Event) -> Vec<Task> {
        if self.role == Role::Stopped {
            trace!("instance stopped, dropping event");
            return self.tasks.drain();
        }

        match event {
            Event::Tick { elapsed_ms, election_timeout_ms } => self.step_tick(elapsed_ms, election_timeout_ms),
            Event::Receive { from, message } => self.step_receive(from, message),
            Event::PersistedEntries { first_index, last_index, status } => self.step_persisted_entries(first_index, last_index, status),
            Event::PersistedTermVote { status } => self.step_persisted_term_vote(status),
            Event::PersistedSnapshot { index, status } => self.step_persisted_snapshot(index, status),
            Event::LoadedSnapshot { index, offset, chunk, last, status } => self.step_loaded_snapshot(index, offset, chunk, last, status),
            Event::CommandApplied { index, result } => self.step_command_applied(index, result),
            Event::SnapshotTaken { index, term, status } => self.step_snapshot_taken(index, term, status),
            Event::Submit { request } => self.step_submit(request),
        }

        self.tasks.drain()
    }

    fn step_tick(&mut self, elapsed_ms: u64, election_timeout_ms: Option<u64>) {
        if let Some(t) = election_timeout_ms {
            self.election_timeout_ms = t;
        }
        match self.role {
            Role::Leader => {
                self.heartbeat_elapsed_ms += elapsed_ms;
                self.tick_leader(elapsed_ms);
            }
            Role::Candidate | Role::Follower => {
                self.election_elapsed_ms += elapsed_ms;
                if self.election_elapsed_ms >= self.election_timeout_ms && self.membership.is_voter(self.id) {
                    self.start_election();
                }
            }
            Role::Stopped => {}
        }
    }

    fn step_receive(&mut self, from: ServerId, message: crate::event::Message) {
        use crate::event::Message::*;

        let msg_term = message.term();
        // A pre-vote *request* carries the candidate's prospective term
        // (current_term + 1) so it can canvass support without committing
        // to it; only the pre-vote *response* carries a real term. Treating
        // the request's prospective term as "higher, step down" would make
        // pre-vote disruptive in exactly the way it exists to prevent.
        let carries_prospective_term = matches!(message, RequestVote { pre_vote: true, .. });
        // When the higher-term message names a leader outright (AppendEntries,
        // InstallSnapshot), pass that along as the step-down hint rather than
        // `None`: `become_follower` needs the real new leader id right away to
        // tell a completed leadership transfer apart from an ordinary step-down
        // (see the `transfer` handling there).
        let new_leader_hint = match &message {
            AppendEntries { leader_id, .. } => Some(*leader_id),
            InstallSnapshot { leader_id, .. } => Some(*leader_id),
            _ => None,
        };
        if msg_term > self.current_term && !carries_prospective_term {
            self.become_follower(msg_term, new_leader_hint);
        }

        match message {
            RequestVote { term, candidate_id, last_log_index, last_log_term, pre_vote } => {
                self.handle_request_vote(term, candidate_id, last_log_index, last_log_term, pre_vote)
            }
            RequestVoteResult { term, vote_granted, pre_vote } => self.handle_request_vote_result(from, term, vote_granted, pre_vote),
            AppendEntries { term, leader_id, prev_index, prev_term, entries, leader_commit } => {
                self.handle_append_entries(term, leader_id, prev_index, prev_term, entries, leader_commit)
            }
            AppendEntriesResult { term, success, last_log_index, conflict_index, conflict_term } => {
                self.handle_append_entries_result(from, term, success, last_log_index, conflict_index, conflict_term)
            }
            InstallSnapshot { term, leader_id, last_index, last_term, configuration, offset, data, is_last } => {
                self.handle_install_snapshot(term, leader_id, last_index, last_term, configuration, offset, data, is_last)
            }
            InstallSnapshotResult { term, last_index } => self.handle_install_snapshot_result(from, term, last_index),
            TimeoutNow { term } => self.handle_timeout_now(term),
        }
    }

    /// Advance `last_applied` as far as `commit_index` allows, emitting one
    /// `ApplyCommand` task per newly committed `Command` entry (Barrier and
    /// Configuration entries are not applied to the FSM, but still advance
    /// `last_applied` and resolve their own client requests) and resolving
    /// client requests whose anchor has been reached.
    pub(crate) fn advance_applied(&mut self) {
        while self.last_applied < self.commit_index {
            let next = self.last_applied + 1;
            let entry = match self.log.get(next) {
                Some(e) => e.clone(),
                None => break, // compacted away; host must have already applied it via a snapshot
            };
            match &entry.payload {
                EntryPayload::Command(payload) => {
                    let _ = self.tasks.push(Task::ApplyCommand { index: next, payload: payload.clone() });
                    // last_applied advances only once COMMAND_APPLIED confirms
                    // the FSM actually processed it, so stop here and let
                    // step_command_applied drive the rest.
                    self.maybe_request_snapshot();
                    return;
                }
                EntryPayload::Barrier | EntryPayload::Configuration(_) => {
                    self.last_applied = next;
                }
            }
        }
        self.resolve_client_requests();
        self.maybe_request_snapshot();
    }

    fn resolve_client_requests(&mut self) {
        let last_applied = self.last_applied;
        let log = &self.log;
        self.clients.resolve_up_to(
            last_applied,
            |idx| log.get(idx).map(|e| e.term()).unwrap_or(0),
            |idx| match log.get(idx).map(|e| e.payload.clone()) {
                Some(EntryPayload::Command(payload)) => payload,
                _ => Vec::new(),
            },
        );
    }

    fn step_command_applied(&mut self, index: Index, _result: Vec<u8>) {
        if index == self.last_applied + 1 {
            self.last_applied = index;
            self.advance_applied();
        }
    }

    /// Transition to follower, observing a higher term (or an explicit
    /// step-down). `new_leader` is a hint; it is unreliable unless and
    /// until a fresh `AppendEntries`/`InstallSnapshot` confirms it.
    pub(crate) fn become_follower(&mut self, term: Term, new_leader: Option<ServerId>) {
        let stepping_down = self.role == Role::Leader;
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            let _ = self.tasks.push(Task::PersistTermAndVote { term: self.current_term, voted_for: None });
        }
        self.role = Role::Follower;
        self.leader_id = new_leader;
        self.election = None;
        self.election_elapsed_ms = 0;
        if stepping_down {
            self.progress = ProgressTracker::new();
            // A leadership transfer in flight resolves here, not as a
            // generic leadership-lost failure: if the server we stepped
            // down in favor of is the transfer's target, the transfer
            // succeeded (spec.md §4.1 "T immediately starts an election
            // with a bumped term"); anything else is a failure.
            if let Some(state) = self.transfer.take() {
                if new_leader == Some(state.target) {
                    self.clients.complete_transfer(state.target);
                } else {
                    self.clients.fail_transfer("stepped down before transfer completed");
                }
            }
            self.clients.fail_all_leadership_lost();
        }
    }

    pub(crate) fn fail_fatal(&mut self, err: RaftError) {
        tracing::error!(error = %err, "fatal collaborator error, stopping instance");
        self.fatal_error = Some(err);
        self.role = Role::Stopped;
        self.clients.fail_all_shutdown();
    }

    pub fn fatal_error(&self) -> Option<&RaftError> {
        self.fatal_error.as_ref()
    }

    /// Drain tasks queued outside of `step` — by `propose`, the direct
    /// submission path a host uses when it wants the rejection value rather
    /// than routing through `Event::Submit`'s `NullCompletion`. `propose`
    /// itself does not drain, so its caller must do so explicitly.
    pub fn drain_tasks(&mut self) -> Vec<Task> {
        self.tasks.drain()
    }
}
