//! Capability shapes for the four collaborators the core talks to through
//! tasks and events (spec.md §6). `step` never calls these traits — they
//! exist so a host has a contract to implement against, and so this crate's
//! own test harness has something concrete to satisfy.
//!
//! Per the design note in spec.md §9, a C-style vtable-of-function-pointers
//! would be the literal port of the original; a plain Rust trait is the
//! idiomatic equivalent and is what this crate uses instead.

use crate::entry::Entry;
use crate::error::IoStatus;
use crate::membership::Membership;
use crate::raft_types::Index;
use crate::raft_types::Term;
use crate::ServerId;

/// Durable state: the `(current_term, voted_for)` record, log entries, and
/// snapshots. A real implementation reports completion asynchronously by
/// feeding the matching `Event` back into `ConsensusState::step`.
pub trait Storage {
    fn persist_entries(&mut self, first_index: Index, entries: Vec<Entry>);
    fn persist_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>);
    fn persist_snapshot(&mut self, last_index: Index, last_term: Term, configuration: Membership, offset: usize, data: Vec<u8>, is_last: bool);
    fn load_snapshot(&mut self, index: Index, offset: usize);
}

/// Outbound message delivery. Per spec.md §6, messages MAY be dropped,
/// reordered or duplicated; the core tolerates all three, so an
/// implementation need not provide at-least-once or ordering guarantees
/// beyond what the network naturally offers.
pub trait Transport {
    fn send_message(&mut self, to: ServerId, address: &str, message: &crate::event::Message);
}

/// Application of committed commands, and snapshot production/restoration.
pub trait Fsm {
    fn apply_command(&mut self, index: Index, payload: &[u8]);
    fn take_snapshot(&mut self, index: Index);
    fn restore_snapshot(&mut self, index: Index);
}

/// The clock collaborator produces `Tick` events at a host-chosen
/// granularity; it has no methods of its own because the core never calls
/// it — it only consumes the events a clock implementation is expected to
/// emit. Present here purely so the four collaborators are named together.
pub trait ClockSource {
    fn tick_interval_ms(&self) -> u64;
}

/// The status an asynchronous collaborator operation completed with, reused
/// by every `Storage`/`Fsm` completion event.
pub fn ok() -> IoStatus {
    IoStatus::Ok
}
