//! Snapshot installation: the leader streaming a compacted log image to a
//! far-behind peer, and a follower receiving it (spec.md §4.1 "Snapshot
//! installation").

use tracing::info;
use tracing::warn;

use crate::membership::Membership;
use crate::raft_types::Index;
use crate::raft_types::Term;
use crate::error::IoStatus;
use crate::event::Message;
use crate::task::Task;
use crate::ServerId;

use super::ConsensusState;
use super::Role;

/// A follower's record of a snapshot it is in the middle of receiving.
#[derive(Debug, Clone)]
pub(crate) struct IncomingSnapshot {
    pub leader_id: ServerId,
    pub last_index: Index,
    pub last_term: Term,
    pub configuration: Membership,
    /// Whether the chunk currently queued for persistence (by `index` in
    /// `PersistedSnapshot`, keyed here by `last_index` since a single
    /// snapshot install has one logical index) is the final one.
    pub final_chunk_pending: bool,
}

/// A leader's record of a `LoadSnapshot` task it issued on a peer's behalf,
/// so the matching `LoadedSnapshot` event can be routed back to that peer
/// (the event itself carries no target id — spec.md §4.1).
#[derive(Debug, Clone)]
pub(crate) struct PendingLoad {
    pub target: ServerId,
    pub index: Index,
    pub offset: usize,
}

impl ConsensusState {
    /// Ask the host to read the chunk at `offset` of the leader's own stored
    /// snapshot, on behalf of `target`.
    pub(super) fn request_snapshot_chunk(&mut self, target: ServerId, offset: usize) {
        let index = self.log.snapshot_last_index();
        self.pending_snapshot_loads.push(PendingLoad { target, index, offset });
        let _ = self.tasks.push(Task::LoadSnapshot { index, offset });
    }

    pub(super) fn step_loaded_snapshot(&mut self, index: Index, offset: usize, chunk: Vec<u8>, last: bool, status: IoStatus) {
        if let IoStatus::IoError(e) = status {
            self.fail_fatal(crate::error::RaftError::IoError { source: e });
            return;
        }
        let matching: Vec<PendingLoad> = {
            let (matched, rest): (Vec<_>, Vec<_>) =
                self.pending_snapshot_loads.drain(..).partition(|p| p.index == index && p.offset == offset);
            self.pending_snapshot_loads = rest;
            matched
        };

        for load in matching {
            let Some(progress) = self.progress.get(load.target) else { continue };
            if progress.snapshot_index != Some(index) {
                continue; // peer moved on (reconnected, rejoined at a later snapshot) since the read was requested
            }
            let _ = self.tasks.push(Task::SendMessage {
                to: load.target,
                address: self.address_of(load.target),
                message: Message::InstallSnapshot {
                    term: self.current_term,
                    leader_id: self.id,
                    last_index: index,
                    last_term: self.log.snapshot_last_term(),
                    configuration: self.membership.clone(),
                    offset,
                    data: chunk.clone(),
                    is_last: last,
                },
            });
            if let Some(p) = self.progress.get_mut(load.target) {
                p.snapshot_offset = offset + chunk.len();
            }
            if !last {
                self.request_snapshot_chunk(load.target, offset + chunk.len());
            }
        }
    }

    /// Leader-side: a follower has finished applying every chunk of a
    /// snapshot previously streamed to it.
    pub(super) fn handle_install_snapshot_result(&mut self, from: ServerId, term: Term, last_index: Index) {
        if self.role != Role::Leader || term != self.current_term {
            return;
        }
        let Some(progress) = self.progress.get_mut(from) else { return };
        if progress.mode != crate::progress::ReplicationMode::Snapshot {
            return;
        }
        progress.record_snapshot_success(last_index, self.log.snapshot_last_term());
        info!(peer = from, last_index, "peer finished snapshot install");
        self.advance_leader_commit();
        self.replicate_to_peer(from);
    }

    /// Follower-side: accept one chunk of an incoming `InstallSnapshot`.
    pub(super) fn handle_install_snapshot(
        &mut self,
        term: Term,
        leader_id: ServerId,
        last_index: Index,
        last_term: Term,
        configuration: Membership,
        offset: usize,
        data: Vec<u8>,
        is_last: bool,
    ) {
        if term < self.current_term {
            return;
        }
        self.role = Role::Follower;
        self.leader_id = Some(leader_id);
        self.election_elapsed_ms = 0;

        if offset == 0 {
            self.incoming_snapshot = Some(IncomingSnapshot {
                leader_id,
                last_index,
                last_term,
                configuration,
                final_chunk_pending: is_last,
            });
        } else if let Some(incoming) = &mut self.incoming_snapshot {
            if incoming.last_index != last_index {
                warn!(last_index, expected = incoming.last_index, "snapshot chunk for unexpected index, restarting install");
                self.incoming_snapshot = Some(IncomingSnapshot { leader_id, last_index, last_term, configuration, final_chunk_pending: is_last });
            } else {
                incoming.final_chunk_pending = is_last;
            }
        } else {
            // A non-zero offset with no install in progress: ask the leader
            // to restart from the beginning rather than guess.
            warn!(offset, "snapshot chunk received with no install in progress");
            return;
        }

        let _ = self.tasks.push(Task::PersistSnapshot { last_index, last_term, configuration: self.incoming_snapshot.as_ref().unwrap().configuration.clone(), offset, data, is_last });
    }

    pub(super) fn step_persisted_snapshot(&mut self, index: Index, status: IoStatus) {
        if let IoStatus::IoError(e) = status {
            self.fail_fatal(crate::error::RaftError::IoError { source: e });
            return;
        }
        let Some(incoming) = &self.incoming_snapshot else { return };
        if incoming.last_index != index || !incoming.final_chunk_pending {
            return;
        }
        let incoming = self.incoming_snapshot.take().unwrap();

        info!(last_index = incoming.last_index, "snapshot install complete");
        self.log.set_snapshot(incoming.last_index, incoming.last_term);
        self.base_membership = incoming.configuration.clone();
        self.commit_index = incoming.last_index;
        self.last_applied = incoming.last_index;
        self.recompute_membership();
        self.clients.fail_truncated_from(1);

        let _ = self.tasks.push(Task::RestoreSnapshot { index: incoming.last_index });
        let _ = self.tasks.push(Task::SendMessage {
            to: incoming.leader_id,
            address: self.address_of(incoming.leader_id),
            message: Message::InstallSnapshotResult { term: self.current_term, last_index: incoming.last_index },
        });
    }

    /// Its own FSM finished producing a snapshot (triggered by
    /// `maybe_request_snapshot` on any role), so the log can be compacted up
    /// to the watermark it reports. Only a leader additionally consults
    /// peer progress before compacting, since a follower has none to
    /// respect.
    pub(super) fn step_snapshot_taken(&mut self, index: Index, term: Term, status: IoStatus) {
        self.snapshot_requested_index = None;
        if let IoStatus::IoError(e) = status {
            self.fail_fatal(crate::error::RaftError::IoError { source: e });
            return;
        }
        if index <= self.log.snapshot_last_index() {
            return; // superseded by a later snapshot already installed
        }
        let trailing_floor = index.saturating_sub(self.config.trailing_entries) + 1;
        let peer_floor = self.progress.min_next_index().unwrap_or(index + 1);
        let keep_floor = trailing_floor.max(1).min(peer_floor);
        self.log.compact_to(index, keep_floor);
        self.log.set_snapshot(index, term);
    }

    /// Ask the FSM to take a fresh snapshot once enough entries have
    /// accumulated past the last one (`Config::snapshot_policy_logs_since_last`),
    /// after `openraft`'s `SnapshotPolicy::LogsSinceLast`. Runs on every
    /// role — compaction bounds memory for followers too, not just the
    /// leader that drives replication.
    pub(crate) fn maybe_request_snapshot(&mut self) {
        if self.snapshot_requested_index.is_some() {
            return; // one already outstanding
        }
        if self.last_applied == 0 {
            return;
        }
        let since_last = self.last_applied.saturating_sub(self.log.snapshot_last_index());
        if since_last >= self.config.snapshot_policy_logs_since_last {
            self.snapshot_requested_index = Some(self.last_applied);
            let _ = self.tasks.push(Task::TakeSnapshot { index: self.last_applied });
        }
    }
}
