//! A host-agnostic implementation of the Raft consensus state machine.
//!
//! This crate ships the *core* described in the project's design docs: a
//! synchronous, deterministic transducer, [`ConsensusState::step`], that
//! consumes an [`Event`] and produces a list of [`Task`]s describing I/O the
//! host must perform. It never touches disk, never sends a byte over the
//! network, never reads a clock and never applies a command to an
//! application state machine — those are the host's collaborators, behind
//! the traits in [`collaborator`].
//!
//! See `SPEC_FULL.md` in the repository root for the full design.

pub mod client;
pub mod collaborator;
pub mod config;
pub mod core;
pub mod election;
pub mod entry;
pub mod error;
pub mod event;
pub mod log;
pub mod membership;
pub mod metrics;
pub mod progress;
pub mod quorum;
pub mod raft_types;
pub mod task;

pub use crate::client::ClientOutcome;
pub use crate::client::Completion;
pub use crate::config::Config;
pub use crate::core::ConsensusState;
pub use crate::core::Role;
pub use crate::entry::Entry;
pub use crate::entry::EntryPayload;
pub use crate::error::RaftError;
pub use crate::error::RaftResult;
pub use crate::event::ClientRequest;
pub use crate::event::ClientRequestKind;
pub use crate::event::Event;
pub use crate::event::Message;
pub use crate::membership::Membership;
pub use crate::membership::ServerRole;
pub use crate::metrics::RaftMetrics;
pub use crate::raft_types::Index;
pub use crate::raft_types::LogId;
pub use crate::raft_types::Term;
pub use crate::task::Task;

/// A cluster member's identity. Left as a bare integer, like `openraft`'s
/// `NodeId` and the original C library's `raft_id` — the host is free to
/// map it onto whatever addressing scheme its transport uses.
pub type ServerId = u64;
