//! The client-request registry: outstanding local operations keyed so their
//! completions can be matched and resolved (spec.md §4.5).

use std::collections::BTreeMap;
use std::fmt;

use crate::error::RaftError;
use crate::raft_types::Index;
use crate::raft_types::Term;
use crate::ServerId;

/// What a resolved client request produces on success.
#[derive(Debug, Clone)]
pub enum ClientOutcome {
    Applied(Vec<u8>),
    BarrierCompleted,
    ConfigurationChanged,
    TransferCompleted { new_leader: ServerId },
}

/// A capability record (spec.md §9) the host binds to whatever mechanism it
/// resolves a pending client call with — a `oneshot::Sender`, a future
/// waker, an RPC response. The core only ever calls `resolve` once per
/// request and then drops it.
pub trait Completion: fmt::Debug + Send {
    fn resolve(self: Box<Self>, result: Result<ClientOutcome, RaftError>);
}

/// A no-op completion used where a request is submitted without anything
/// listening for the result (e.g. fire-and-forget internal barriers).
#[derive(Debug)]
pub struct NullCompletion;

impl Completion for NullCompletion {
    fn resolve(self: Box<Self>, _result: Result<ClientOutcome, RaftError>) {}
}

struct PendingEntry {
    request_id: u64,
    /// The term the anchoring entry was created in; if the entry at
    /// `anchor_index` is later overwritten by a follower's truncation, the
    /// recorded term will no longer match and the request fails with
    /// `LEADERSHIP_LOST` rather than being resolved against the wrong entry.
    anchor_term: Term,
    completion: Box<dyn Completion>,
    kind: PendingKind,
}

enum PendingKind {
    Apply,
    Barrier,
    Change,
}

struct PendingTransfer {
    request_id: u64,
    target: ServerId,
    completion: Box<dyn Completion>,
}

/// Outstanding local client operations, keyed by the log index each anchors
/// on. Resolution triggers when `last_applied` catches up to `anchor_index`
/// *and* the entry at that index still carries the recorded term; failure
/// triggers on leadership loss, truncation past the anchor, or shutdown.
#[derive(Default)]
pub struct ClientRequestRegistry {
    pending: BTreeMap<Index, PendingEntry>,
    transfer: Option<PendingTransfer>,
}

impl fmt::Debug for ClientRequestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequestRegistry")
            .field("pending_count", &self.pending.len())
            .field("transfer_in_flight", &self.transfer.is_some())
            .finish()
    }
}

impl ClientRequestRegistry {
    pub fn new() -> Self {
        ClientRequestRegistry::default()
    }

    pub fn register_apply(&mut self, anchor_index: Index, anchor_term: Term, request_id: u64, completion: Box<dyn Completion>) {
        self.pending.insert(anchor_index, PendingEntry { request_id, anchor_term, completion, kind: PendingKind::Apply });
    }

    pub fn register_barrier(&mut self, anchor_index: Index, anchor_term: Term, request_id: u64, completion: Box<dyn Completion>) {
        self.pending.insert(anchor_index, PendingEntry { request_id, anchor_term, completion, kind: PendingKind::Barrier });
    }

    pub fn register_change(&mut self, anchor_index: Index, anchor_term: Term, request_id: u64, completion: Box<dyn Completion>) {
        self.pending.insert(anchor_index, PendingEntry { request_id, anchor_term, completion, kind: PendingKind::Change });
    }

    /// Register a pending transfer's completion token. The caller
    /// (`ConsensusState::handle_transfer_request`) is expected to have
    /// already rejected a second concurrent transfer before calling this;
    /// if one still slips through, resolve it here rather than drop the
    /// completion silently.
    pub fn register_transfer(&mut self, request_id: u64, target: ServerId, completion: Box<dyn Completion>) {
        if self.transfer.is_some() {
            completion.resolve(Err(RaftError::ConfigurationBusy));
            return;
        }
        self.transfer = Some(PendingTransfer { request_id, target, completion });
    }

    pub fn has_configuration_change_in_flight(&self) -> bool {
        self.pending.values().any(|p| matches!(p.kind, PendingKind::Change))
    }

    pub fn transfer_target(&self) -> Option<ServerId> {
        self.transfer.as_ref().map(|t| t.target)
    }

    /// Resolve every request whose `anchor_index <= last_applied` and whose
    /// recorded term matches the log's current term at that index, applying
    /// `applied_results` (indexed from the lowest resolved index) to APPLY
    /// requests.
    pub fn resolve_up_to(&mut self, last_applied: Index, term_at: impl Fn(Index) -> Term, mut result_for: impl FnMut(Index) -> Vec<u8>) {
        let ready_indices: Vec<Index> = self.pending.range(..=last_applied).map(|(idx, _)| *idx).collect();
        for idx in ready_indices {
            let entry = self.pending.remove(&idx).unwrap();
            if entry.anchor_term != term_at(idx) {
                entry.completion.resolve(Err(RaftError::LeadershipLost));
                continue;
            }
            let outcome = match entry.kind {
                PendingKind::Apply => ClientOutcome::Applied(result_for(idx)),
                PendingKind::Barrier => ClientOutcome::BarrierCompleted,
                PendingKind::Change => ClientOutcome::ConfigurationChanged,
            };
            entry.completion.resolve(Ok(outcome));
        }
    }

    /// Fail every request anchored at or after `from_index`: the entries
    /// backing them were just truncated away.
    pub fn fail_truncated_from(&mut self, from_index: Index) {
        let affected: Vec<Index> = self.pending.range(from_index..).map(|(idx, _)| *idx).collect();
        for idx in affected {
            let entry = self.pending.remove(&idx).unwrap();
            entry.completion.resolve(Err(RaftError::LeadershipLost));
        }
    }

    /// Fail every pending request (and a pending transfer) because
    /// leadership was lost.
    pub fn fail_all_leadership_lost(&mut self) {
        for (_, entry) in std::mem::take(&mut self.pending) {
            entry.completion.resolve(Err(RaftError::LeadershipLost));
        }
        if let Some(t) = self.transfer.take() {
            t.completion.resolve(Err(RaftError::TransferFailed { target: t.target, reason: "leadership lost".to_string() }));
        }
    }

    /// Fail every pending request because the instance is shutting down.
    pub fn fail_all_shutdown(&mut self) {
        for (_, entry) in std::mem::take(&mut self.pending) {
            entry.completion.resolve(Err(RaftError::Shutdown));
        }
        if let Some(t) = self.transfer.take() {
            t.completion.resolve(Err(RaftError::Shutdown));
        }
    }

    pub fn complete_transfer(&mut self, new_leader: ServerId) {
        if let Some(t) = self.transfer.take() {
            t.completion.resolve(Ok(ClientOutcome::TransferCompleted { new_leader }));
        }
    }

    pub fn fail_transfer(&mut self, reason: impl Into<String>) {
        if let Some(t) = self.transfer.take() {
            let reason = reason.into();
            t.completion.resolve(Err(RaftError::TransferFailed { target: t.target, reason }));
        }
    }
}
