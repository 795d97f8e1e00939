//! Wire messages and the `Event` enum `step` consumes (spec.md §4.1, §6).

use crate::entry::Entry;
use crate::error::IoStatus;
use crate::membership::Membership;
use crate::raft_types::Index;
use crate::raft_types::Term;
use crate::ServerId;

/// A Raft RPC, always carrying the sender's term.
#[derive(Debug, Clone)]
pub enum Message {
    RequestVote {
        term: Term,
        candidate_id: ServerId,
        last_log_index: Index,
        last_log_term: Term,
        pre_vote: bool,
    },
    RequestVoteResult {
        term: Term,
        vote_granted: bool,
        pre_vote: bool,
    },
    AppendEntries {
        term: Term,
        leader_id: ServerId,
        prev_index: Index,
        prev_term: Term,
        entries: Vec<Entry>,
        leader_commit: Index,
    },
    AppendEntriesResult {
        term: Term,
        success: bool,
        last_log_index: Index,
        conflict_index: Index,
        conflict_term: Term,
    },
    InstallSnapshot {
        term: Term,
        leader_id: ServerId,
        last_index: Index,
        last_term: Term,
        configuration: Membership,
        offset: usize,
        data: Vec<u8>,
        is_last: bool,
    },
    InstallSnapshotResult {
        term: Term,
        last_index: Index,
    },
    TimeoutNow {
        term: Term,
    },
}

impl Message {
    pub fn term(&self) -> Term {
        match self {
            Message::RequestVote { term, .. } => *term,
            Message::RequestVoteResult { term, .. } => *term,
            Message::AppendEntries { term, .. } => *term,
            Message::AppendEntriesResult { term, .. } => *term,
            Message::InstallSnapshot { term, .. } => *term,
            Message::InstallSnapshotResult { term, .. } => *term,
            Message::TimeoutNow { term } => *term,
        }
    }
}

/// The outstanding kinds of local client operation (spec.md §3 "Client
/// request").
#[derive(Debug, Clone)]
pub enum ClientRequestKind {
    Apply { payload: Vec<u8> },
    Barrier,
    Change { new_roles: std::collections::BTreeMap<ServerId, crate::membership::ServerRole>, new_addresses: std::collections::BTreeMap<ServerId, String> },
    Transfer { target: ServerId },
}

/// A local client submission, carrying an opaque completion token the host
/// uses to resolve its own future/callback when the request's outcome is
/// known (spec.md §4.5, §9's capability-record design note).
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub id: u64,
    pub kind: ClientRequestKind,
}

/// The stimuli the consensus core reacts to. Every externally visible
/// change, including tick-driven timeouts, arrives as one of these.
#[derive(Debug, Clone)]
pub enum Event {
    /// Advance timers by `elapsed_ms`. `election_timeout_ms`, when `Some`,
    /// replaces the instance's current election timeout with the host's
    /// freshly jittered value (spec_full.md §4.1).
    Tick { elapsed_ms: u64, election_timeout_ms: Option<u64> },
    Receive { from: ServerId, message: Message },
    PersistedEntries { first_index: Index, last_index: Index, status: IoStatus },
    PersistedTermVote { status: IoStatus },
    PersistedSnapshot { index: Index, status: IoStatus },
    LoadedSnapshot { index: Index, offset: usize, chunk: Vec<u8>, last: bool, status: IoStatus },
    CommandApplied { index: Index, result: Vec<u8> },
    SnapshotTaken { index: Index, term: Term, status: IoStatus },
    Submit { request: ClientRequest },
}
