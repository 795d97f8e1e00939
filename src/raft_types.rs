//! Core scalar types shared by every module: terms, indices and log ids.

use std::fmt::Display;
use std::fmt::Formatter;

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

/// An election epoch. Monotonically non-decreasing for the lifetime of a server.
pub type Term = u64;

/// A 1-based log position. `0` means "no entry".
pub type Index = u64;

/// Identifies a log entry by the term that created it and its dense index.
///
/// `(0, 0)` is the zero-th, nonexistent entry: the implicit predecessor of
/// index 1. It is the only log id allowed to have a zero term or zero index;
/// `LogId::new` enforces that the two are zero together.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogId {
    pub term: Term,
    pub index: Index,
}

impl LogId {
    pub fn new(term: Term, index: Index) -> Self {
        if term == 0 || index == 0 {
            assert_eq!(index, 0, "zero-th log entry must be (0,0), but ({}, {})", term, index);
            assert_eq!(term, 0, "zero-th log entry must be (0,0), but ({}, {})", term, index);
        }
        LogId { term, index }
    }
}

impl From<(Term, Index)> for LogId {
    fn from(v: (Term, Index)) -> Self {
        LogId::new(v.0, v.1)
    }
}

impl Display for LogId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

/// Convenience accessors for `Option<LogId>`, which stands in for "the last
/// known log id, or none if the log is empty".
pub trait LogIdOptionExt {
    fn index(&self) -> Option<Index>;
    fn next_index(&self) -> Index;
}

impl LogIdOptionExt for Option<LogId> {
    fn index(&self) -> Option<Index> {
        self.map(|x| x.index)
    }

    fn next_index(&self) -> Index {
        match self {
            None => 0,
            Some(log_id) => log_id.index + 1,
        }
    }
}

/// Convenience accessors for `Option<Index>`.
pub trait LogIndexOptionExt {
    fn next_index(&self) -> Index;
    fn prev_index(&self) -> Self;
}

impl LogIndexOptionExt for Option<Index> {
    fn next_index(&self) -> Index {
        match self {
            None => 0,
            Some(v) => v + 1,
        }
    }

    fn prev_index(&self) -> Self {
        match self {
            None => panic!("None has no previous value"),
            Some(0) => None,
            Some(v) => Some(v - 1),
        }
    }
}

/// An update action that can either set a new value or leave the field as-is,
/// distinguishing "set to default" from "don't touch" in partial updates.
#[derive(Debug, Clone, PartialOrd, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Update<T> {
    Update(T),
    AsIs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_id_zero_is_allowed() {
        let id = LogId::new(0, 0);
        assert_eq!(id.index, 0);
        assert_eq!(id.term, 0);
    }

    #[test]
    #[should_panic]
    fn log_id_rejects_mismatched_zero() {
        LogId::new(1, 0);
    }

    #[test]
    fn next_index_of_none_is_zero() {
        let id: Option<LogId> = None;
        assert_eq!(id.next_index(), 0);
    }

    #[test]
    fn next_index_of_some_is_index_plus_one() {
        let id = Some(LogId::new(3, 7));
        assert_eq!(id.next_index(), 8);
    }

    #[test]
    fn prev_index_decrements() {
        assert_eq!(Some(5u64).prev_index(), Some(4));
        assert_eq!(Some(0u64).prev_index(), None);
    }
}
