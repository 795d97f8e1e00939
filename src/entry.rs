//! Log entries: the unit of replication.

use crate::membership::Membership;
use crate::raft_types::LogId;

/// The payload of a single log entry.
///
/// Entries are immutable once created; a follower only ever discards entries
/// wholesale via `Log::truncate`, never edits one in place.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntryPayload {
    /// An opaque application command. The core never interprets the bytes.
    Command(Vec<u8>),
    /// A membership change, committed the same way as any other entry.
    Configuration(Membership),
    /// A no-op written by a new leader to confirm its term has a committed
    /// entry before it starts accepting reads that depend on the commit
    /// index (the classic "commit a blank entry on election" rule), and by
    /// `SUBMIT(BARRIER)` to establish a read/linearizability fence.
    Barrier,
}

impl EntryPayload {
    pub fn is_configuration(&self) -> bool {
        matches!(self, EntryPayload::Configuration(_))
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entry {
    pub log_id: LogId,
    pub payload: EntryPayload,
}

impl Entry {
    pub fn new(log_id: LogId, payload: EntryPayload) -> Self {
        Entry { log_id, payload }
    }

    pub fn term(&self) -> u64 {
        self.log_id.term
    }

    pub fn index(&self) -> u64 {
        self.log_id.index
    }
}
