//! Leader-side replication: building `AppendEntries` batches per peer
//! progress state, and handling the results that come back.
//!
//! Grounded on `async-raft/src/core/replication.rs`'s `handle_replica_event`
//! and `calculate_new_commit_index` (ported to `quorum.rs`), adapted from a
//! spawned-stream-per-peer design to the synchronous, single `step` model.

use tracing::debug;
use tracing::warn;

use crate::event::Message;
use crate::raft_types::Term;
use crate::task::Task;
use crate::ServerId;
use crate::progress::ReplicationMode;
use crate::raft_types::Index;

use super::ConsensusState;
use super::Role;

impl ConsensusState {
    /// Send (or queue) a replication message to every replication target
    /// other than self, according to each peer's current progress mode.
    pub(crate) fn replicate_to_all_peers(&mut self) {
        let targets: Vec<ServerId> = self.membership.replication_targets().into_iter().filter(|id| *id != self.id).collect();
        for id in targets {
            self.progress.ensure(id, self.log.last_index() + 1);
            self.maybe_transition_to_snapshot(id);
            self.replicate_to_peer(id);
        }
    }

    pub(super) fn maybe_transition_to_snapshot(&mut self, id: ServerId) {
        if self.progress.should_transition_to_snapshot(id, self.log.snapshot_last_index()) {
            if let Some(p) = self.progress.get_mut(id) {
                p.enter_snapshot(self.log.snapshot_last_index());
            }
            self.request_snapshot_chunk(id, 0);
        }
    }

    pub(super) fn replicate_to_peer(&mut self, id: ServerId) {
        let Some(progress) = self.progress.get(id).cloned() else { return };
        match progress.mode {
            ReplicationMode::Snapshot => {} // driven by LOADED_SNAPSHOT instead
            ReplicationMode::Probe => {
                if progress.inflight > 0 {
                    return; // already waiting on the single in-flight probe
                }
                self.send_append_entries(id, 1);
            }
            ReplicationMode::Pipeline => {
                if progress.inflight >= self.config.max_inflight_per_peer {
                    return;
                }
                self.send_append_entries(id, self.config.max_append_entries);
            }
        }
    }

    fn send_append_entries(&mut self, id: ServerId, max_entries: usize) {
        let next_index = match self.progress.get(id) {
            Some(p) => p.next_index,
            None => return,
        };
        let prev_index = next_index.saturating_sub(1);
        let prev_term = self.log.term_of(prev_index);
        let last_index = self.log.last_index();
        let to = (next_index + max_entries as u64).min(last_index + 1);
        let entries = self.log.range(next_index, to);

        let _ = self.tasks.push(Task::SendMessage {
            to: id,
            address: self.address_of(id),
            message: Message::AppendEntries {
                term: self.current_term,
                leader_id: self.id,
                prev_index,
                prev_term,
                entries,
                leader_commit: self.commit_index,
            },
        });

        if let Some(p) = self.progress.get_mut(id) {
            p.inflight += 1;
            p.last_send_ms = Some(0);
        }
    }

    pub(super) fn handle_append_entries_result(
        &mut self,
        from: ServerId,
        term: Term,
        success: bool,
        last_log_index: Index,
        conflict_index: Index,
        conflict_term: Term,
    ) {
        if self.role != Role::Leader || term != self.current_term {
            return;
        }
        let match_term = self.log.term_of(last_log_index);
        let Some(progress) = self.progress.get_mut(from) else { return };
        progress.last_recv_ms = Some(0);

        if success {
            progress.record_append_success(last_log_index, match_term);
            debug!(peer = from, match_index = last_log_index, match_term, "append succeeded");
        } else {
            warn!(peer = from, conflict_index, conflict_term, "append rejected");
            let log = &self.log;
            progress.record_append_rejected(conflict_index, conflict_term, |idx| log.term_of(idx));
        }

        self.advance_leader_commit();
        self.maybe_transition_to_snapshot(from);
        self.replicate_to_peer(from);
        self.maybe_advance_transfer(from);
    }
}
