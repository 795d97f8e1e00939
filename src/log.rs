//! The in-memory window over the replicated log (spec.md §4.2).

use std::collections::VecDeque;

use crate::entry::Entry;
use crate::raft_types::Index;
use crate::raft_types::LogId;
use crate::raft_types::Term;

/// A conflict hint computed by a follower rejecting an `AppendEntries`,
/// letting the leader skip an entire conflicting term in one step rather
/// than decrementing `next_index` one entry at a time.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ConflictHint {
    pub conflict_index: Index,
    pub conflict_term: Term,
}

/// The in-memory tail of the replicated log: everything after the last
/// snapshot, plus the snapshot's own `(index, term)` watermark.
///
/// Indices are always dense: `entries[0].index == snapshot_last_index + 1`
/// whenever `entries` is non-empty, enforced by every mutator below.
#[derive(Debug, Clone, Default)]
pub struct Log {
    snapshot_last_index: Index,
    snapshot_last_term: Term,
    entries: VecDeque<Entry>,
}

impl Log {
    pub fn new() -> Self {
        Log::default()
    }

    pub fn snapshot_last_index(&self) -> Index {
        self.snapshot_last_index
    }

    pub fn snapshot_last_term(&self) -> Term {
        self.snapshot_last_term
    }

    pub fn last_log_id(&self) -> Option<LogId> {
        match self.entries.back() {
            Some(e) => Some(e.log_id),
            None if self.snapshot_last_index > 0 => Some(LogId::new(self.snapshot_last_term, self.snapshot_last_index)),
            None => None,
        }
    }

    pub fn last_index(&self) -> Index {
        self.last_log_id().map(|id| id.index).unwrap_or(0)
    }

    pub fn last_term(&self) -> Term {
        self.last_log_id().map(|id| id.term).unwrap_or(0)
    }

    /// The first index this log can answer queries about without consulting
    /// the snapshot (i.e. the oldest entry still held in memory).
    pub fn first_in_memory_index(&self) -> Option<Index> {
        self.entries.front().map(|e| e.index())
    }

    fn position_of(&self, index: Index) -> Option<usize> {
        let first = self.first_in_memory_index()?;
        if index < first {
            return None;
        }
        let offset = (index - first) as usize;
        if offset < self.entries.len() {
            Some(offset)
        } else {
            None
        }
    }

    pub fn get(&self, index: Index) -> Option<&Entry> {
        if index == 0 {
            return None;
        }
        self.position_of(index).map(|pos| &self.entries[pos])
    }

    /// The term of the entry at `index`, `0` if unknown (before the log's
    /// start, or past its end), matching the reject-hint conventions of
    /// spec.md §4.1's "Log matching on followers".
    pub fn term_of(&self, index: Index) -> Term {
        if index == 0 {
            return 0;
        }
        if index == self.snapshot_last_index {
            return self.snapshot_last_term;
        }
        self.get(index).map(|e| e.term()).unwrap_or(0)
    }

    /// Append entries known to be contiguous with the log's current end.
    pub fn append(&mut self, entries: impl IntoIterator<Item = Entry>) {
        for e in entries {
            debug_assert_eq!(e.index(), self.last_index() + 1, "log append must be contiguous");
            self.entries.push_back(e);
        }
    }

    /// Discard every entry at or after `from_index`. Only valid on a
    /// follower or candidate (spec.md §4.2); the leader's own code paths
    /// never call this.
    pub fn truncate(&mut self, from_index: Index) {
        while let Some(back) = self.entries.back() {
            if back.index() >= from_index {
                self.entries.pop_back();
            } else {
                break;
            }
        }
    }

    pub fn range(&self, from: Index, to: Index) -> Vec<Entry> {
        let mut out = Vec::new();
        let mut idx = from;
        while idx < to {
            if let Some(e) = self.get(idx) {
                out.push(e.clone());
            }
            idx += 1;
        }
        out
    }

    /// Compute the reject hint for a follower whose log doesn't match an
    /// incoming `AppendEntries`' `(prev_index, prev_term)`.
    pub fn conflict_hint(&self, prev_index: Index, prev_term: Term) -> ConflictHint {
        if prev_index > self.last_index() {
            return ConflictHint { conflict_index: self.last_index() + 1, conflict_term: 0 };
        }
        let local_term = self.term_of(prev_index);
        if local_term == prev_term {
            // Shouldn't be called in this case, but stay well-defined.
            return ConflictHint { conflict_index: prev_index, conflict_term: local_term };
        }
        let conflict_term = local_term;
        let mut conflict_index = prev_index;
        while conflict_index > self.snapshot_last_index && self.term_of(conflict_index - 1) == conflict_term {
            conflict_index -= 1;
        }
        ConflictHint { conflict_index, conflict_term }
    }

    /// Install a snapshot watermark, discarding every in-memory entry at or
    /// before `last_index` (used both when the leader compacts and when a
    /// follower finishes installing a streamed snapshot).
    pub fn set_snapshot(&mut self, last_index: Index, last_term: Term) {
        while let Some(front) = self.entries.front() {
            if front.index() <= last_index {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        // If the snapshot is ahead of everything we hold (e.g. installed
        // wholesale on a far-behind follower), drop everything.
        if self.last_index() < last_index {
            self.entries.clear();
        }
        self.snapshot_last_index = last_index;
        self.snapshot_last_term = last_term;
    }

    /// Discard entries at or before `upto`, but never past `keep_floor`
    /// (the slowest peer's `next_index`), implementing the retained-tail
    /// policy of spec.md §4.2 and the trailing-retention knob of §9.
    pub fn compact_to(&mut self, upto: Index, keep_floor: Index) {
        let bound = upto.min(keep_floor.saturating_sub(1));
        while let Some(front) = self.entries.front() {
            if front.index() <= bound && front.index() <= upto {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryPayload;

    fn entry(term: u64, index: u64) -> Entry {
        Entry::new(LogId::new(term, index), EntryPayload::Command(vec![]))
    }

    #[test]
    fn empty_log_has_zero_last_index() {
        let log = Log::new();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
    }

    #[test]
    fn append_and_get() {
        let mut log = Log::new();
        log.append(vec![entry(1, 1), entry(1, 2)]);
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.get(1).unwrap().term(), 1);
        assert_eq!(log.term_of(3), 0);
    }

    #[test]
    fn truncate_discards_tail() {
        let mut log = Log::new();
        log.append(vec![entry(1, 1), entry(1, 2), entry(2, 3)]);
        log.truncate(2);
        assert_eq!(log.last_index(), 1);
        assert!(log.get(2).is_none());
    }

    #[test]
    fn conflict_hint_shorter_log() {
        let log = Log::new();
        let hint = log.conflict_hint(5, 2);
        assert_eq!(hint.conflict_index, 1);
        assert_eq!(hint.conflict_term, 0);
    }

    #[test]
    fn conflict_hint_scans_back_to_term_start() {
        let mut log = Log::new();
        log.append(vec![entry(1, 1), entry(1, 2), entry(2, 3)]);
        let hint = log.conflict_hint(2, 2);
        assert_eq!(hint.conflict_term, 1);
        assert_eq!(hint.conflict_index, 1);
    }

    #[test]
    fn set_snapshot_drops_old_entries() {
        let mut log = Log::new();
        log.append(vec![entry(1, 1), entry(1, 2), entry(2, 3)]);
        log.set_snapshot(2, 1);
        assert_eq!(log.snapshot_last_index(), 2);
        assert!(log.get(1).is_none());
        assert!(log.get(3).is_some());
    }

    #[test]
    fn compact_to_respects_keep_floor() {
        let mut log = Log::new();
        log.append(vec![entry(1, 1), entry(1, 2), entry(1, 3), entry(1, 4)]);
        log.compact_to(3, 3); // slowest peer still needs entry 3 onward
        assert!(log.get(2).is_none());
        assert!(log.get(3).is_some());
    }
}
