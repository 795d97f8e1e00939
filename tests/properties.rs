//! Randomized event-interleaving checks for the invariants spec.md §8 names
//! as this crate's testable properties: Election Safety, Leader Append-Only,
//! Log Matching, Leader Completeness, State Machine Safety, Term
//! Monotonicity, and Determinism.
//!
//! Each fuzz round drives exactly one event through one node (a tick, a
//! message delivery, or a fault-injected variant of one), then checks every
//! cheap invariant against the cluster's state as it stands. A fixed seed
//! keeps a failure reproducible without needing to capture the failing
//! sequence separately.

mod common;

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use raft_consensus::entry::EntryPayload;
use raft_consensus::event::Event;
use raft_consensus::raft_types::Index;
use raft_consensus::raft_types::Term;
use raft_consensus::Role;
use raft_consensus::ServerId;

use common::Cluster;

const NODE_IDS: [ServerId; 3] = [1, 2, 3];

/// Accumulated cross-round state the invariant checks need beyond what a
/// single `Cluster` snapshot carries.
#[derive(Default)]
struct InvariantTracker {
    /// The one leader ever observed for a given term (Election Safety).
    leader_of_term: BTreeMap<Term, ServerId>,
    /// The log, as of the last round `(id, term)` was observed leading, so
    /// a later round can check it only ever grew (Leader Append-Only).
    leader_log_snapshots: BTreeMap<(ServerId, Term), Vec<(Term, Index)>>,
    /// Every index known to have committed anywhere, with the term and
    /// command bytes (when it was a `Command` entry) it committed with
    /// (Leader Completeness).
    committed: BTreeMap<Index, (Term, Option<Vec<u8>>)>,
}

impl InvariantTracker {
    fn check(&mut self, cluster: &Cluster) {
        self.check_election_safety(cluster);
        self.check_leader_append_only(cluster);
        self.record_committed(cluster);
        self.check_leader_completeness(cluster);
        self.check_log_matching(cluster);
        self.check_state_machine_safety(cluster);
    }

    fn check_election_safety(&mut self, cluster: &Cluster) {
        for (id, node) in &cluster.nodes {
            if node.core.role == Role::Leader {
                match self.leader_of_term.get(&node.core.current_term) {
                    Some(existing) => assert_eq!(
                        *existing, *id,
                        "two different nodes both led term {}",
                        node.core.current_term
                    ),
                    None => {
                        self.leader_of_term.insert(node.core.current_term, *id);
                    }
                }
            }
        }
    }

    fn check_leader_append_only(&mut self, cluster: &Cluster) {
        for (id, node) in &cluster.nodes {
            if node.core.role != Role::Leader {
                continue;
            }
            let key = (*id, node.core.current_term);
            let current: Vec<(Term, Index)> = {
                let mut v = Vec::new();
                let mut idx = node.core.log.first_in_memory_index().unwrap_or(node.core.log.last_index() + 1);
                while idx <= node.core.log.last_index() {
                    if let Some(e) = node.core.log.get(idx) {
                        v.push((e.term(), e.index()));
                    }
                    idx += 1;
                }
                v
            };
            if let Some(prev) = self.leader_log_snapshots.get(&key) {
                assert!(
                    current.len() >= prev.len(),
                    "leader {id}'s log at term {} shrank while it led",
                    node.core.current_term
                );
                assert_eq!(
                    &current[..prev.len()],
                    prev.as_slice(),
                    "leader {id} rewrote an entry already in its own log at term {}",
                    node.core.current_term
                );
            }
            self.leader_log_snapshots.insert(key, current);
        }
    }

    fn record_committed(&mut self, cluster: &Cluster) {
        for node in cluster.nodes.values() {
            let mut idx = 1;
            while idx <= node.core.commit_index {
                if let Some(entry) = node.core.log.get(idx) {
                    let payload = match &entry.payload {
                        EntryPayload::Command(bytes) => Some(bytes.clone()),
                        _ => None,
                    };
                    self.committed.entry(idx).or_insert((entry.term(), payload));
                }
                idx += 1;
            }
        }
    }

    fn check_leader_completeness(&self, cluster: &Cluster) {
        for node in cluster.nodes.values() {
            if node.core.role != Role::Leader {
                continue;
            }
            for (&idx, (term, payload)) in &self.committed {
                // A leader's log starts at `snapshot_last_index + 1`; an
                // entry committed before that watermark was compacted away
                // under this leader's own (or a predecessor's) authority,
                // which is fine — it's already reflected in the snapshot.
                if idx <= node.core.log.snapshot_last_index() {
                    continue;
                }
                let entry = node
                    .core
                    .log
                    .get(idx)
                    .unwrap_or_else(|| panic!("leader {} is missing committed index {idx}", node.core.id));
                assert_eq!(entry.term(), *term, "leader {} has the wrong term at committed index {idx}", node.core.id);
                if let Some(expected) = payload {
                    match &entry.payload {
                        EntryPayload::Command(actual) => assert_eq!(actual, expected, "leader {} diverges on committed index {idx}", node.core.id),
                        other => panic!("leader {} has a non-command entry at committed index {idx}: {other:?}", node.core.id),
                    }
                }
            }
        }
    }

    fn check_log_matching(&self, cluster: &Cluster) {
        let ids: Vec<ServerId> = cluster.nodes.keys().copied().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let a = &cluster.nodes[&ids[i]].core.log;
                let b = &cluster.nodes[&ids[j]].core.log;
                let lo = a.snapshot_last_index().max(b.snapshot_last_index()) + 1;
                let hi = a.last_index().min(b.last_index());
                let mut idx = lo;
                while idx <= hi {
                    if let (Some(ea), Some(eb)) = (a.get(idx), b.get(idx)) {
                        if ea.term() == eb.term() {
                            assert_eq!(
                                format!("{:?}", ea.payload),
                                format!("{:?}", eb.payload),
                                "nodes {} and {} disagree on entry {idx} despite matching term {}",
                                ids[i],
                                ids[j],
                                ea.term()
                            );
                        }
                    }
                    idx += 1;
                }
            }
        }
    }

    fn check_state_machine_safety(&self, cluster: &Cluster) {
        let ids: Vec<ServerId> = cluster.nodes.keys().copied().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let a = &cluster.nodes[&ids[i]].fsm.applied;
                let b = &cluster.nodes[&ids[j]].fsm.applied;
                for (idx, payload) in a {
                    if let Some(other) = b.get(idx) {
                        assert_eq!(payload, other, "nodes {} and {} applied different commands at index {idx}", ids[i], ids[j]);
                    }
                }
            }
        }
    }
}

fn step_once(cluster: &mut Cluster, rng: &mut StdRng) {
    match rng.gen_range(0u32..8) {
        0 | 1 => {
            let id = NODE_IDS[rng.gen_range(0..NODE_IDS.len())];
            let timeout = rng.gen_range(150..=300);
            cluster.drive(id, Event::Tick { elapsed_ms: rng.gen_range(10..=80), election_timeout_ms: Some(timeout) });
        }
        2 | 3 | 4 => {
            cluster.deliver_one();
        }
        5 => {
            cluster.bus.duplicate_last();
        }
        6 => {
            cluster.bus.reorder_swap_front();
        }
        _ => {
            if let Some(&leader) = cluster.leaders().first() {
                let payload = vec![rng.gen::<u8>(), rng.gen::<u8>()];
                cluster.submit_apply(leader, payload);
            } else {
                cluster.bus.drop_one();
            }
        }
    }
}

#[test]
fn fuzz_maintains_core_invariants() {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE_u64);
    let mut cluster = Cluster::new(&NODE_IDS);
    let mut tracker = InvariantTracker::default();
    let mut last_term: BTreeMap<ServerId, Term> = BTreeMap::new();

    for round in 0..2_000u32 {
        step_once(&mut cluster, &mut rng);

        for (id, node) in &cluster.nodes {
            let prev = *last_term.get(id).unwrap_or(&0);
            assert!(node.core.current_term >= prev, "node {id}'s term regressed from {prev} to {} at round {round}", node.core.current_term);
            last_term.insert(*id, node.core.current_term);
        }

        tracker.check(&cluster);
    }

    // The fuzz run should have made real progress, not just thrashed on
    // rejected submits with no leader ever elected.
    assert!(!tracker.leader_of_term.is_empty(), "no leader was ever elected across the whole run");
    assert!(!tracker.committed.is_empty(), "no entry ever committed across the whole run");
}

/// Determinism: replaying the exact same event sequence against a fresh set
/// of instances reproduces the same final state bit-for-bit, since `step`
/// never reads a clock or a random source of its own (spec.md §4.1).
#[test]
fn identical_event_sequence_reproduces_identical_state() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut recorded: Vec<(ServerId, Event)> = Vec::new();

    // Drive one cluster while recording every event actually delivered
    // (including ones a fault-injection action produced), via a thin wrapper
    // that logs before calling into the real harness.
    let mut cluster_a = Cluster::new(&NODE_IDS);
    for _ in 0..400u32 {
        record_step(&mut cluster_a, &mut rng, &mut recorded);
    }

    // Replay the identical sequence against a fresh cluster with no fault
    // injection involved this time — just direct event delivery.
    let mut cluster_b = Cluster::new(&NODE_IDS);
    for (id, event) in &recorded {
        cluster_b.drive(*id, event.clone());
    }

    for id in NODE_IDS {
        let a = &cluster_a.nodes[&id].core;
        let b = &cluster_b.nodes[&id].core;
        assert_eq!(a.current_term, b.current_term, "node {id} term diverged on replay");
        assert_eq!(a.role, b.role, "node {id} role diverged on replay");
        assert_eq!(a.commit_index, b.commit_index, "node {id} commit_index diverged on replay");
        assert_eq!(a.log.last_index(), b.log.last_index(), "node {id} log length diverged on replay");
        let mut idx = a.log.snapshot_last_index() + 1;
        while idx <= a.log.last_index() {
            let ea = a.log.get(idx);
            let eb = b.log.get(idx);
            assert_eq!(format!("{ea:?}"), format!("{eb:?}"), "node {id} entry {idx} diverged on replay");
            idx += 1;
        }
    }
}

/// Drive one random action on `cluster`, appending every top-level event
/// handed to `Cluster::drive` to `recorded` so it can be replayed verbatim
/// later. Every action here goes through `Event`, including client
/// submissions (`Event::Submit`, unlike the `ConsensusState::propose` path
/// `step_once` also exercises) so the whole sequence is exactly replayable.
fn record_step(cluster: &mut Cluster, rng: &mut StdRng, recorded: &mut Vec<(ServerId, Event)>) {
    match rng.gen_range(0u32..6) {
        0 | 1 => {
            let id = NODE_IDS[rng.gen_range(0..NODE_IDS.len())];
            let timeout = rng.gen_range(150..=300);
            let event = Event::Tick { elapsed_ms: rng.gen_range(10..=80), election_timeout_ms: Some(timeout) };
            recorded.push((id, event.clone()));
            cluster.drive(id, event);
        }
        2 | 3 => {
            if let Some((from, to, message)) = cluster.bus.pop_front() {
                let event = Event::Receive { from, message };
                recorded.push((to, event.clone()));
                cluster.drive(to, event);
            }
        }
        _ => {
            if let Some(&leader) = cluster.leaders().first() {
                let payload = vec![rng.gen::<u8>()];
                let request = raft_consensus::event::ClientRequest { id: rng.gen(), kind: raft_consensus::event::ClientRequestKind::Apply { payload } };
                let event = Event::Submit { request };
                recorded.push((leader, event.clone()));
                cluster.drive(leader, event);
            }
        }
    }
}
