//! Cluster membership: voters, standbys, spares, and joint-consensus state.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::quorum;
use crate::ServerId;

/// The role a server plays in a configuration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServerRole {
    /// Counts toward quorum and may become leader.
    Voter,
    /// Replicated like a voter but never counted for quorum or granted votes.
    Standby,
    /// Known to the cluster but not actively replicated to (e.g. a server
    /// being staged for future promotion).
    Spare,
}

/// A cluster membership, as stored in a `CONFIGURATION` log entry.
///
/// `joint` holds the previous voter set for the duration of a single-server
/// membership change: while `Some`, a quorum must be reached in *both*
/// `voters` (C_new) and `joint` (C_old) — see `Membership::quorum_sets`.
#[derive(Debug, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Membership {
    pub roles: BTreeMap<ServerId, ServerRole>,
    pub addresses: BTreeMap<ServerId, String>,
    pub joint: Option<BTreeSet<ServerId>>,
}

impl Membership {
    /// A single-server bootstrap configuration: `id` is the sole voter.
    pub fn new_initial(id: ServerId, address: impl Into<String>) -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(id, ServerRole::Voter);
        let mut addresses = BTreeMap::new();
        addresses.insert(id, address.into());
        Membership { roles, addresses, joint: None }
    }

    pub fn voters(&self) -> BTreeSet<ServerId> {
        self.roles
            .iter()
            .filter(|(_, role)| **role == ServerRole::Voter)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn standbys(&self) -> BTreeSet<ServerId> {
        self.roles
            .iter()
            .filter(|(_, role)| **role == ServerRole::Standby)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_voter(&self, id: ServerId) -> bool {
        self.roles.get(&id) == Some(&ServerRole::Voter)
    }

    /// All servers a leader must actively replicate to: voters and standbys,
    /// plus the old voter set during a joint change (so a demoted voter
    /// keeps receiving entries until the change commits).
    pub fn replication_targets(&self) -> BTreeSet<ServerId> {
        let mut targets = self.voters();
        targets.extend(self.standbys());
        if let Some(old) = &self.joint {
            targets.extend(old.iter().copied());
        }
        targets
    }

    pub fn address_of(&self, id: ServerId) -> Option<&str> {
        self.addresses.get(&id).map(|s| s.as_str())
    }

    /// The voter sets a quorum must be reached over: just `voters` normally,
    /// or `[voters, joint]` during a membership change in progress.
    pub fn quorum_sets(&self) -> Vec<BTreeSet<ServerId>> {
        match &self.joint {
            None => vec![self.voters()],
            Some(old) => vec![self.voters(), old.clone()],
        }
    }

    /// Whether `ids` forms a quorum in every voter set that must agree
    /// (both halves during joint consensus).
    pub fn is_quorum(&self, ids: &BTreeSet<ServerId>) -> bool {
        self.quorum_sets().iter().all(|set| {
            let count = set.intersection(ids).count();
            count >= quorum::majority_of(set.len())
        })
    }

    /// Build the C_old ∪ C_new joint configuration for a membership change
    /// that moves to `new_roles`/`new_addresses`.
    pub fn enter_joint(&self, new_roles: BTreeMap<ServerId, ServerRole>, new_addresses: BTreeMap<ServerId, String>) -> Membership {
        let mut addresses = self.addresses.clone();
        addresses.extend(new_addresses);
        Membership {
            roles: new_roles,
            addresses,
            joint: Some(self.voters()),
        }
    }

    /// Drop the joint (old) voter set once the change has committed.
    pub fn leave_joint(&self) -> Membership {
        Membership {
            roles: self.roles.clone(),
            addresses: self.addresses.clone(),
            joint: None,
        }
    }

    /// Validate a proposed new role/address map against the invariant that a
    /// change may never remove the last voter, nor target an unknown server
    /// missing from the combined C_old ∪ C_new address map.
    pub fn validate_change(&self, new_roles: &BTreeMap<ServerId, ServerRole>, new_addresses: &BTreeMap<ServerId, String>) -> Result<(), String> {
        let new_voters = new_roles.iter().filter(|(_, r)| **r == ServerRole::Voter).count();
        if new_voters == 0 {
            return Err("change would leave no voter".to_string());
        }
        for id in new_roles.keys() {
            if !new_addresses.contains_key(id) && !self.addresses.contains_key(id) {
                return Err(format!("target server {} has no known address", id));
            }
        }
        Ok(())
    }
}
