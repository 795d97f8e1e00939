//! The error taxonomy the core surfaces to its host, per §7 of the spec.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::raft_types::Index;
use crate::raft_types::Term;
use crate::ServerId;

/// An opaque, cloneable wrapper around a collaborator-reported error.
///
/// The core never inspects the contents of an I/O failure; it only needs to
/// carry it far enough to hand back to the host or to a failed client
/// request. Wrapping in `Arc` keeps `RaftError` cheap to clone, which matters
/// because a single `IO_ERROR` fans out into a `SHUTDOWN` for every pending
/// request.
#[derive(Clone)]
pub struct AnyError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl AnyError {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AnyError(Arc::new(err))
    }
}

impl fmt::Debug for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by the consensus core, either as a direct rejection of a
/// local `SUBMIT` or as the failure value delivered to a client request's
/// completion token.
#[derive(Clone, Debug, Error)]
pub enum RaftError {
    #[error("node is not the leader; last known leader is {leader_id:?}")]
    NotLeader { leader_id: Option<ServerId> },

    #[error("leadership lost before the request could be committed")]
    LeadershipLost,

    #[error("a membership change is already in flight")]
    ConfigurationBusy,

    #[error("membership change is invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("leadership transfer to {target} failed: {reason}")]
    TransferFailed { target: ServerId, reason: String },

    #[error("leader is transferring leadership to {target}; not accepting new commands")]
    TransferInProgress { target: ServerId },

    #[error("task queue could not grow to accept a new task")]
    NoMem,

    #[error("instance is shutting down")]
    Shutdown,

    #[error("collaborator reported an I/O error: {source}")]
    IoError {
        #[source]
        source: AnyError,
    },
}

impl RaftError {
    pub fn io_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RaftError::IoError { source: AnyError::new(err) }
    }
}

pub type RaftResult<T> = Result<T, RaftError>;

/// The outcome a `PERSISTED_*`/`LOADED_*`/`COMMAND_APPLIED`/`SNAPSHOT_TAKEN`
/// event carries back from a collaborator.
#[derive(Clone, Debug)]
pub enum IoStatus {
    Ok,
    IoError(AnyError),
}

impl IoStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, IoStatus::Ok)
    }
}

/// A log-id shaped key used when an `IO_ERROR` needs to reference the range
/// of entries or the term/vote record a collaborator failed to persist.
#[derive(Clone, Debug)]
pub struct PersistTarget {
    pub first_index: Option<Index>,
    pub last_index: Option<Index>,
    pub term: Option<Term>,
}
