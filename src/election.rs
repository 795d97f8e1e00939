//! Per-peer vote tallies while this server is a candidate.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::membership::Membership;
use crate::ServerId;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VoteOutcome {
    Pending,
    Granted,
    Rejected,
}

/// Whether an election poll is the non-durable pre-vote canvass or the real,
/// term-bumping election (spec.md §4.1: "Pre-vote MAY be supported as a
/// two-phase variant; if implemented, the pre-vote phase does not mutate
/// durable state").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ElectionPhase {
    PreVote,
    Election,
}

/// Tracks grants/rejections for a single election (or pre-vote) attempt.
#[derive(Debug, Clone)]
pub struct ElectionTracker {
    pub phase: ElectionPhase,
    votes: BTreeMap<ServerId, VoteOutcome>,
}

impl ElectionTracker {
    pub fn new(phase: ElectionPhase, self_id: ServerId, voters: &BTreeSet<ServerId>) -> Self {
        let mut votes = BTreeMap::new();
        for id in voters {
            votes.insert(*id, VoteOutcome::Pending);
        }
        // A candidate always grants itself a vote.
        votes.insert(self_id, VoteOutcome::Granted);
        ElectionTracker { phase, votes }
    }

    pub fn record(&mut self, id: ServerId, granted: bool) {
        self.votes.insert(id, if granted { VoteOutcome::Granted } else { VoteOutcome::Rejected });
    }

    fn granted_ids(&self) -> BTreeSet<ServerId> {
        self.votes.iter().filter(|(_, o)| **o == VoteOutcome::Granted).map(|(id, _)| *id).collect()
    }

    fn rejected_ids(&self) -> BTreeSet<ServerId> {
        self.votes.iter().filter(|(_, o)| **o == VoteOutcome::Rejected).map(|(id, _)| *id).collect()
    }

    /// Whether the grants so far form a quorum under `membership`.
    pub fn has_quorum(&self, membership: &Membership) -> bool {
        membership.is_quorum(&self.granted_ids())
    }

    /// Whether the election is hopeless: enough rejections exist that no
    /// later grant can still reach quorum in every required voter set.
    pub fn is_hopeless(&self, membership: &Membership) -> bool {
        let rejected = self.rejected_ids();
        membership.quorum_sets().iter().any(|set| {
            let possible_grants: BTreeSet<ServerId> = set.difference(&rejected).copied().collect();
            possible_grants.len() < crate::quorum::majority_of(set.len())
        })
    }
}
