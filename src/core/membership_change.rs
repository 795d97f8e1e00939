//! Membership changes: the single-entry joint-consensus design (spec.md
//! §4.1 "Membership change"). One `Configuration` log entry carries both
//! the new roles/addresses and, in its `joint` field, the old voter set;
//! `ConsensusState::recompute_membership` drops `joint` once the entry
//! commits, so no second "leave joint" entry is ever proposed.

use std::collections::BTreeMap;

use tracing::info;

use crate::client::Completion;
use crate::entry::EntryPayload;
use crate::error::RaftError;
use crate::membership::ServerRole;
use crate::ServerId;

use super::ConsensusState;
use super::Role;

impl ConsensusState {
    pub(super) fn handle_change_request(
        &mut self,
        request_id: u64,
        new_roles: BTreeMap<ServerId, ServerRole>,
        new_addresses: BTreeMap<ServerId, String>,
        completion: Box<dyn Completion>,
    ) {
        if self.role != Role::Leader {
            completion.resolve(Err(RaftError::NotLeader { leader_id: self.leader_id }));
            return;
        }
        if self.configuration_uncommitted_index.is_some() || self.clients.has_configuration_change_in_flight() {
            completion.resolve(Err(RaftError::ConfigurationBusy));
            return;
        }
        if let Err(reason) = self.membership.validate_change(&new_roles, &new_addresses) {
            completion.resolve(Err(RaftError::ConfigurationInvalid { reason }));
            return;
        }

        let joint = self.membership.enter_joint(new_roles, new_addresses);
        info!(?joint, "proposing joint membership change");

        let index = self.propose_entry(EntryPayload::Configuration(joint));
        self.configuration_uncommitted_index = Some(index);
        self.clients.register_change(index, self.current_term, request_id, completion);
    }
}
