//! Candidate-side election logic: pre-vote canvassing and real elections.

use tracing::info;

use crate::election::ElectionPhase;
use crate::election::ElectionTracker;
use crate::event::Message;
use crate::raft_types::Term;
use crate::task::Task;
use crate::ServerId;

use super::ConsensusState;
use super::Role;

impl ConsensusState {
    /// Called when the election timeout has elapsed. Begins a pre-vote
    /// canvass if enabled, else a real (term-bumping) election.
    pub(super) fn start_election(&mut self) {
        if self.config.enable_pre_vote {
            self.begin_election(ElectionPhase::PreVote);
        } else {
            self.begin_election(ElectionPhase::Election);
        }
    }

    fn begin_election(&mut self, phase: ElectionPhase) {
        let prospective_term = self.current_term + 1;

        if phase == ElectionPhase::Election {
            self.current_term = prospective_term;
            self.voted_for = Some(self.id);
            let _ = self.tasks.push(Task::PersistTermAndVote { term: self.current_term, voted_for: Some(self.id) });
        }

        self.role = Role::Candidate;
        self.leader_id = None;
        self.election_elapsed_ms = 0;

        let voters = self.membership.voters();
        let mut tracker = ElectionTracker::new(phase, self.id, &voters);

        let term_to_send = match phase {
            ElectionPhase::PreVote => prospective_term,
            ElectionPhase::Election => self.current_term,
        };
        let last_log_id = self.log.last_log_id();
        let (last_log_index, last_log_term) = match last_log_id {
            Some(id) => (id.index, id.term),
            None => (0, 0),
        };

        info!(?phase, term = term_to_send, "starting election");

        for peer in voters.iter().filter(|&&id| id != self.id) {
            let _ = self.tasks.push(Task::SendMessage {
                to: *peer,
                address: self.address_of(*peer),
                message: Message::RequestVote {
                    term: term_to_send,
                    candidate_id: self.id,
                    last_log_index,
                    last_log_term,
                    pre_vote: phase == ElectionPhase::PreVote,
                },
            });
        }

        // A single-voter cluster (or one where we're already a quorum)
        // wins immediately without waiting for any reply.
        let immediate_quorum = tracker.has_quorum(&self.membership);
        self.election = Some(tracker);
        if immediate_quorum {
            self.advance_election(phase);
        }
    }

    fn advance_election(&mut self, phase: ElectionPhase) {
        match phase {
            ElectionPhase::PreVote => self.begin_election(ElectionPhase::Election),
            ElectionPhase::Election => self.become_leader(),
        }
    }

    pub(super) fn handle_request_vote_result(&mut self, from: ServerId, term: Term, vote_granted: bool, pre_vote: bool) {
        if self.role != Role::Candidate {
            return;
        }
        let Some(tracker) = &mut self.election else { return };
        if tracker.phase != if pre_vote { ElectionPhase::PreVote } else { ElectionPhase::Election } {
            return;
        }
        // Real-election replies must match the term we're campaigning in;
        // pre-vote replies carry a real (not prospective) term and are
        // accepted as long as they're not stale relative to it.
        if !pre_vote && term != self.current_term {
            return;
        }

        tracker.record(from, vote_granted);

        if tracker.has_quorum(&self.membership) {
            self.advance_election(tracker.phase);
        } else if tracker.is_hopeless(&self.membership) {
            // No quorum is still reachable this round; fall back to
            // follower and let the next election timeout retry.
            let term = self.current_term;
            self.become_follower(term, self.leader_id);
        }
    }
}
