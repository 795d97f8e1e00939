//! Leadership transfer (spec.md §4.1 "Leadership transfer"): the leader
//! stops accepting new commands, catches the target up to `last_index`,
//! then sends it `TimeoutNow` so it can start an election immediately in a
//! bumped term. Completion is observed indirectly, as a step-down in
//! `ConsensusState::become_follower` in favor of the transfer's target.

use tracing::info;
use tracing::warn;

use crate::client::Completion;
use crate::error::RaftError;
use crate::event::Message;
use crate::task::Task;
use crate::ServerId;

use super::ConsensusState;
use super::Role;

/// Core-side bookkeeping for an in-flight transfer. Separate from the
/// completion token the client-request registry holds (`client.rs`'s
/// `PendingTransfer`): this half tracks the clock-driven timeout and the
/// catch-up state, so it can be advanced without touching `client.rs` at
/// all, mirroring the split between `configuration_uncommitted_index` and
/// `clients.has_configuration_change_in_flight()` for membership changes.
#[derive(Debug, Clone)]
pub(crate) struct TransferState {
    pub target: ServerId,
    elapsed_ms: u64,
    sent_timeout_now: bool,
}

impl ConsensusState {
    pub(super) fn handle_transfer_request(&mut self, request_id: u64, target: ServerId, completion: Box<dyn Completion>) {
        if self.role != Role::Leader {
            completion.resolve(Err(RaftError::NotLeader { leader_id: self.leader_id }));
            return;
        }
        if target == self.id {
            completion.resolve(Err(RaftError::ConfigurationInvalid { reason: "cannot transfer leadership to self".to_string() }));
            return;
        }
        if !self.membership.is_voter(target) {
            completion.resolve(Err(RaftError::ConfigurationInvalid { reason: format!("{target} is not a voter in the current configuration") }));
            return;
        }
        if self.transfer.is_some() {
            completion.resolve(Err(RaftError::ConfigurationBusy));
            return;
        }

        info!(target, "leadership transfer requested");
        self.transfer = Some(TransferState { target, elapsed_ms: 0, sent_timeout_now: false });
        self.clients.register_transfer(request_id, target, completion);
        self.drive_transfer(target);
    }

    /// If `target` is caught up to our log, send it `TimeoutNow`; otherwise
    /// leave it to replication (driven again from `maybe_advance_transfer`
    /// after every `AppendEntriesResult`) to catch it up first.
    fn drive_transfer(&mut self, target: ServerId) {
        let last_index = self.log.last_index();
        let caught_up = self.progress.get(target).map(|p| p.is_up_to_date(last_index)).unwrap_or(false);
        if !caught_up {
            return;
        }
        let already_sent = matches!(&self.transfer, Some(state) if state.sent_timeout_now);
        if already_sent {
            return;
        }
        if let Some(state) = &mut self.transfer {
            state.sent_timeout_now = true;
        }
        let _ = self.tasks.push(Task::SendMessage {
            to: target,
            address: self.address_of(target),
            message: Message::TimeoutNow { term: self.current_term },
        });
    }

    /// Called after every `AppendEntriesResult` is processed: if a transfer
    /// to `from` is in flight, check whether it has just caught up.
    pub(crate) fn maybe_advance_transfer(&mut self, from: ServerId) {
        let in_flight = matches!(&self.transfer, Some(state) if state.target == from);
        if in_flight {
            self.drive_transfer(from);
        }
    }

    /// Driven once per `Tick` while leader: abort the transfer once
    /// `transfer_timeout_ms` elapses without it completing, per spec.md
    /// §4.1's "Abort conditions".
    pub(super) fn tick_transfer(&mut self, elapsed_ms: u64) {
        let timed_out = match &mut self.transfer {
            Some(state) => {
                state.elapsed_ms += elapsed_ms;
                state.elapsed_ms >= self.config.transfer_timeout_ms
            }
            None => false,
        };
        if timed_out {
            let target = self.transfer.take().map(|s| s.target);
            warn!(target = ?target, "leadership transfer timed out");
            self.clients.fail_transfer("transfer timed out");
        }
    }
}
