//! Follower-side handling of incoming RPCs and persistence completions.

use tracing::debug;

use crate::entry::Entry;
use crate::error::IoStatus;
use crate::event::Message;
use crate::raft_types::Index;
use crate::raft_types::Term;
use crate::task::Task;
use crate::ServerId;

use super::ConsensusState;
use super::PendingAck;
use super::Role;

impl ConsensusState {
    fn log_is_up_to_date(&self, last_log_index: Index, last_log_term: Term) -> bool {
        let my_last_term = self.log.last_term();
        let my_last_index = self.log.last_index();
        last_log_term > my_last_term || (last_log_term == my_last_term && last_log_index >= my_last_index)
    }

    pub(super) fn handle_request_vote(&mut self, term: Term, candidate_id: ServerId, last_log_index: Index, last_log_term: Term, pre_vote: bool) {
        if term < self.current_term {
            let _ = self.tasks.push(Task::SendMessage {
                to: candidate_id,
                address: self.address_of(candidate_id),
                message: Message::RequestVoteResult { term: self.current_term, vote_granted: false, pre_vote },
            });
            return;
        }

        let up_to_date = self.log_is_up_to_date(last_log_index, last_log_term);

        let grant = if pre_vote {
            up_to_date
        } else {
            let already_voted_other = matches!(self.voted_for, Some(v) if v != candidate_id);
            up_to_date && !already_voted_other
        };

        if grant && !pre_vote {
            self.voted_for = Some(candidate_id);
            let _ = self.tasks.push(Task::PersistTermAndVote { term: self.current_term, voted_for: Some(candidate_id) });
            self.election_elapsed_ms = 0;
        }

        debug!(candidate_id, pre_vote, grant, "voting decision");

        let _ = self.tasks.push(Task::SendMessage {
            to: candidate_id,
            address: self.address_of(candidate_id),
            message: Message::RequestVoteResult { term: self.current_term, vote_granted: grant, pre_vote },
        });
    }

    pub(super) fn handle_timeout_now(&mut self, term: Term) {
        if term < self.current_term {
            return;
        }
        if !self.membership.is_voter(self.id) {
            return;
        }
        // A transfer target starts an election immediately, bypassing its
        // normal election timeout (spec.md §4.1 Leadership transfer).
        self.start_election();
    }

    /// The core append-entries acceptance path: validate the log-matching
    /// prefix, truncate on conflict, append what's new, and either ack
    /// immediately (already-durable prefix) or queue the ack behind a
    /// `PersistEntries` task.
    pub(super) fn handle_append_entries(
        &mut self,
        term: Term,
        leader_id: ServerId,
        prev_index: Index,
        prev_term: Term,
        entries: Vec<Entry>,
        leader_commit: Index,
    ) {
        if term < self.current_term {
            let _ = self.tasks.push(Task::SendMessage {
                to: leader_id,
                address: self.address_of(leader_id),
                message: Message::AppendEntriesResult {
                    term: self.current_term,
                    success: false,
                    last_log_index: self.log.last_index(),
                    conflict_index: 0,
                    conflict_term: 0,
                },
            });
            return;
        }

        self.role = Role::Follower;
        self.leader_id = Some(leader_id);
        self.election_elapsed_ms = 0;

        let matches_prefix = prev_index == 0 || prev_index < self.log.snapshot_last_index() || self.log.term_of(prev_index) == prev_term;

        if !matches_prefix {
            let hint = self.log.conflict_hint(prev_index, prev_term);
            let _ = self.tasks.push(Task::SendMessage {
                to: leader_id,
                address: self.address_of(leader_id),
                message: Message::AppendEntriesResult {
                    term: self.current_term,
                    success: false,
                    last_log_index: self.log.last_index(),
                    conflict_index: hint.conflict_index,
                    conflict_term: hint.conflict_term,
                },
            });
            return;
        }

        // A stale, duplicated or reordered `AppendEntries` can carry a
        // prefix of entries this follower already folded into its snapshot
        // (spec.md §6: the transport may drop, reorder or duplicate any
        // message). Those indices aren't present in the in-memory log, so
        // `term_of` reports `0` for them exactly as it would for a
        // genuinely new index — skip them outright rather than let the
        // conflict-detection loop below mistake "compacted" for "new".
        let snapshot_last_index = self.log.snapshot_last_index();
        let skip = snapshot_last_index.saturating_sub(prev_index).min(entries.len() as u64) as usize;

        // Find the first incoming entry not already present with a matching
        // term, truncating a conflicting suffix per the log-matching
        // property (spec.md §3: if two entries share (index, term) every
        // preceding entry is identical, so a mismatch means everything from
        // here on must go).
        let mut append_from = skip;
        let mut truncate_at: Option<Index> = None;
        for (i, e) in entries.iter().enumerate().skip(skip) {
            let target_index = prev_index + 1 + i as u64;
            let existing_term = self.log.term_of(target_index);
            if existing_term == 0 {
                append_from = i;
                break;
            } else if existing_term != e.term() {
                truncate_at = Some(target_index);
                append_from = i;
                break;
            } else {
                append_from = i + 1;
            }
        }

        if let Some(at) = truncate_at {
            self.log.truncate(at);
            self.clients.fail_truncated_from(at);
            self.persisted_index = self.persisted_index.min(at.saturating_sub(1));
            self.recompute_membership();
        }

        let to_append: Vec<Entry> = entries[append_from..].to_vec();
        let match_last_index = prev_index + entries.len() as u64;

        if !to_append.is_empty() {
            let first_index = to_append[0].index();
            self.log.append(to_append.clone());
            let _ = self.tasks.push(Task::PersistEntries { first_index, entries: to_append });
            self.pending_acks.push_back(PendingAck { first_index, last_index: match_last_index, term: self.current_term, leader_commit });
            self.recompute_membership();
        } else if match_last_index <= snapshot_last_index || self.persisted_index >= match_last_index {
            // Either every entry in this message was already folded into
            // the snapshot (so it's durable by construction, with no
            // `PersistEntries` task ever coming to confirm it), or this
            // follower's disk already covers the range.
            self.ack_append_entries(match_last_index, leader_commit);
        } else {
            self.pending_acks.push_back(PendingAck {
                first_index: self.persisted_index + 1,
                last_index: match_last_index,
                term: self.current_term,
                leader_commit,
            });
        }
    }

    /// Send a successful `AppendEntriesResult` and advance `commit_index`
    /// from the leader's `leader_commit`, capped at what we actually hold.
    pub(super) fn ack_append_entries(&mut self, last_log_index: Index, leader_commit: Index) {
        let leader_id = self.leader_id;
        let _ = self.tasks.push(Task::SendMessage {
            to: leader_id.unwrap_or(0),
            address: leader_id.map(|id| self.address_of(id)).unwrap_or_default(),
            message: Message::AppendEntriesResult { term: self.current_term, success: true, last_log_index, conflict_index: 0, conflict_term: 0 },
        });
        if leader_commit > self.commit_index {
            self.commit_index = leader_commit.min(last_log_index);
            self.recompute_membership();
            self.advance_applied();
        }
    }

    pub(super) fn step_persisted_entries(&mut self, first_index: Index, last_index: Index, status: IoStatus) {
        match status {
            IoStatus::IoError(e) => self.fail_fatal(crate::error::RaftError::IoError { source: e }),
            IoStatus::Ok => {
                self.persisted_index = self.persisted_index.max(last_index);
                debug!(first_index, last_index, "entries persisted");
                if self.role == Role::Leader {
                    self.advance_leader_commit();
                } else {
                    self.flush_pending_acks();
                }
            }
        }
    }

    pub(super) fn flush_pending_acks(&mut self) {
        while let Some(front) = self.pending_acks.front() {
            if front.last_index <= self.persisted_index && front.term == self.current_term {
                let ack = self.pending_acks.pop_front().unwrap();
                self.ack_append_entries(ack.last_index, ack.leader_commit);
            } else {
                break;
            }
        }
    }

    pub(super) fn step_persisted_term_vote(&mut self, status: IoStatus) {
        if let IoStatus::IoError(e) = status {
            self.fail_fatal(crate::error::RaftError::IoError { source: e });
        }
    }

    pub(crate) fn address_of(&self, id: ServerId) -> String {
        self.membership.address_of(id).map(str::to_string).unwrap_or_default()
    }
}
