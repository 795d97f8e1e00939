//! Leader-side bookkeeping: the transition into leadership, client
//! submissions, heartbeats, and commit-index advancement.

use tracing::info;

use crate::client::NullCompletion;
use crate::entry::Entry;
use crate::entry::EntryPayload;
use crate::event::ClientRequest;
use crate::event::ClientRequestKind;
use crate::raft_types::Index;
use crate::raft_types::LogId;
use crate::task::Task;

use super::ConsensusState;
use super::Role;

impl ConsensusState {
    pub(super) fn become_leader(&mut self) {
        info!(term = self.current_term, "became leader");
        self.role = Role::Leader;
        self.leader_id = Some(self.id);
        self.election = None;
        self.heartbeat_elapsed_ms = 0;

        let next = self.log.last_index() + 1;
        self.progress = crate::progress::ProgressTracker::new();
        for peer in self.membership.replication_targets() {
            if peer != self.id {
                self.progress.ensure(peer, next);
            }
        }

        // A new leader commits a blank Barrier entry in its own term before
        // any read or write it services can be trusted to reflect the full
        // committed prefix (the standard "commit a no-op on election" rule,
        // needed because the commit rule only counts entries from the
        // current term).
        self.propose_entry(EntryPayload::Barrier);
    }

    /// Append `payload` to the log at `last_index + 1` under the current
    /// term, queue it for persistence, and replicate it to every peer whose
    /// progress allows sending right away. Returns the new entry's index.
    pub(crate) fn propose_entry(&mut self, payload: EntryPayload) -> Index {
        let index = self.log.last_index() + 1;
        let log_id = LogId::new(self.current_term, index);
        let entry = Entry::new(log_id, payload);
        self.log.append(vec![entry.clone()]);
        let _ = self.tasks.push(Task::PersistEntries { first_index: index, entries: vec![entry] });
        if matches!(self.log.get(index).unwrap().payload, EntryPayload::Configuration(_)) {
            self.recompute_membership();
        }
        self.replicate_to_all_peers();
        index
    }

    pub(super) fn step_submit(&mut self, request: ClientRequest) {
        if self.role != Role::Leader {
            let err = crate::error::RaftError::NotLeader { leader_id: self.leader_id };
            // The host is expected to have attached a real completion token
            // to `request`; since `Event::Submit` in this crate's public
            // surface carries only the request's *kind* and `id`, rejection
            // here is reported through a `NullCompletion` and the returned
            // task list carries no further signal. Hosts that need the
            // error value should check `ConsensusState::metrics().role`
            // before submitting, or call `propose` (see below) directly.
            let _ = err;
            return;
        }
        // A leader in the middle of a transfer stops accepting new commands
        // (spec.md §4.1 "Leadership transfer"); a second Transfer request
        // still goes through `handle_transfer_request`, which rejects it
        // with `CONFIGURATION_BUSY` on its own.
        if self.transfer.is_some() && !matches!(request.kind, ClientRequestKind::Transfer { .. }) {
            return;
        }

        match request.kind {
            ClientRequestKind::Apply { payload } => {
                let index = self.propose_entry(EntryPayload::Command(payload));
                self.clients.register_apply(index, self.current_term, request.id, Box::new(NullCompletion));
            }
            ClientRequestKind::Barrier => {
                let index = self.propose_entry(EntryPayload::Barrier);
                self.clients.register_barrier(index, self.current_term, request.id, Box::new(NullCompletion));
            }
            ClientRequestKind::Change { new_roles, new_addresses } => {
                self.handle_change_request(request.id, new_roles, new_addresses, Box::new(NullCompletion));
            }
            ClientRequestKind::Transfer { target } => {
                self.handle_transfer_request(request.id, target, Box::new(NullCompletion));
            }
        }
    }

    /// The programmatic submission path used directly by a host that wants
    /// the rejection value rather than a `NullCompletion`, and by this
    /// crate's own tests. Unlike `step`, this does not drain the task
    /// queue — call `ConsensusState::drain_tasks` afterward.
    pub fn propose(&mut self, request_id: u64, kind: ClientRequestKind, completion: Box<dyn crate::client::Completion>) {
        if self.role != Role::Leader {
            completion.resolve(Err(crate::error::RaftError::NotLeader { leader_id: self.leader_id }));
            return;
        }
        if let Some(state) = &self.transfer {
            if !matches!(kind, ClientRequestKind::Transfer { .. }) {
                completion.resolve(Err(crate::error::RaftError::TransferInProgress { target: state.target }));
                return;
            }
        }
        match kind {
            ClientRequestKind::Apply { payload } => {
                let index = self.propose_entry(EntryPayload::Command(payload));
                self.clients.register_apply(index, self.current_term, request_id, completion);
            }
            ClientRequestKind::Barrier => {
                let index = self.propose_entry(EntryPayload::Barrier);
                self.clients.register_barrier(index, self.current_term, request_id, completion);
            }
            ClientRequestKind::Change { new_roles, new_addresses } => {
                self.handle_change_request(request_id, new_roles, new_addresses, completion);
            }
            ClientRequestKind::Transfer { target } => {
                self.handle_transfer_request(request_id, target, completion);
            }
        }
    }

    pub(super) fn tick_leader(&mut self, elapsed_ms: u64) {
        if self.heartbeat_elapsed_ms >= self.config.heartbeat_interval_ms {
            self.heartbeat_elapsed_ms = 0;
            self.replicate_to_all_peers();
        }
        self.tick_transfer(elapsed_ms);
    }

    /// Recompute `commit_index` from every voter's (and, during a joint
    /// change, every old-voter's) match index, then drive `last_applied`
    /// and client-request resolution forward.
    pub(crate) fn advance_leader_commit(&mut self) {
        let mut entries_c0: Vec<(u64, u64)> = Vec::new();
        let voters = self.membership.voters();
        for id in &voters {
            if *id == self.id {
                entries_c0.push((self.persisted_index, self.log.term_of(self.persisted_index)));
            } else if let Some(p) = self.progress.get(*id) {
                entries_c0.push((p.match_index, p.match_term));
            }
        }
        let mut new_commit = crate::quorum::calculate_new_commit_index(entries_c0, self.commit_index, self.current_term);

        if let Some(old) = self.membership.joint.clone() {
            let mut entries_old: Vec<(u64, u64)> = Vec::new();
            for id in &old {
                if *id == self.id {
                    entries_old.push((self.persisted_index, self.log.term_of(self.persisted_index)));
                } else if let Some(p) = self.progress.get(*id) {
                    entries_old.push((p.match_index, p.match_term));
                }
            }
            let old_commit = crate::quorum::calculate_new_commit_index(entries_old, self.commit_index, self.current_term);
            new_commit = new_commit.min(old_commit);
        }

        if new_commit > self.commit_index {
            self.commit_index = new_commit;
            self.recompute_membership();
            self.advance_applied();
        }
    }
}
