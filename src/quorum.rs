//! Quorum arithmetic, shared by the election tracker and the leader's commit
//! index calculation.

/// The number of members needed for a strict majority of a set of the given
/// size: `floor(n/2) + 1`.
pub fn majority_of(n: usize) -> usize {
    n / 2 + 1
}

/// Given the highest known `(index, term)` replicated on each member of a
/// single voter set, the leader's current commit index, and the leader's
/// current term, compute the new commit index for that set.
///
/// The result never regresses below `current_commit`, and only advances past
/// it when the majority-ranked entry's term equals `leader_term` — the
/// current-term commit rule that keeps a leader from committing a prior
/// term's entry by count alone (spec.md §4.1 "Commit rule").
pub fn calculate_new_commit_index(mut entries: Vec<(u64, u64)>, current_commit: u64, leader_term: u64) -> u64 {
    if entries.is_empty() {
        return current_commit;
    }

    entries.sort_unstable_by_key(|e| e.0);

    let majority = majority_of(entries.len());
    let offset = entries.len() - majority;
    let candidate = entries[offset];

    if candidate.0 > current_commit && candidate.1 == leader_term {
        candidate.0
    } else {
        current_commit
    }
}
