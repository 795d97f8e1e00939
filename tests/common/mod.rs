//! A small in-memory harness driving several `ConsensusState` instances
//! through a simulated transport/storage/FSM, grounded on
//! `memstore::MemStore`'s shape (an append-only log-of-record and a
//! `HashMap`-backed toy state machine) but adapted to this crate's
//! synchronous event/task model rather than `openraft`'s async storage
//! trait. Not part of the published crate; used only by the integration
//! tests under `tests/`.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use raft_consensus::client::ClientOutcome;
use raft_consensus::client::Completion;
use raft_consensus::error::IoStatus;
use raft_consensus::error::RaftError;
use raft_consensus::event::ClientRequestKind;
use raft_consensus::event::Event;
use raft_consensus::event::Message;
use raft_consensus::membership::Membership;
use raft_consensus::membership::ServerRole;
use raft_consensus::task::Task;
use raft_consensus::Config;
use raft_consensus::ConsensusState;
use raft_consensus::Role;
use raft_consensus::ServerId;

/// A `HashMap`-backed toy application, recording every command applied (in
/// index order) rather than mutating any particular state, so tests can
/// assert on "what got applied, in what order" directly.
#[derive(Default, Debug)]
pub struct TestFsm {
    pub applied: BTreeMap<u64, Vec<u8>>,
    pub restored_to: Option<u64>,
}

pub struct Node {
    pub core: ConsensusState,
    pub fsm: TestFsm,
}

/// A recording `Completion` a test can inspect after the fact, after the
/// `RecordingCompletion` used in `client.rs`'s own unit tests.
#[derive(Debug, Default)]
pub struct Recorder {
    pub result: std::cell::RefCell<Option<Result<ClientOutcome, RaftError>>>,
}

#[derive(Debug)]
pub struct RecordingCompletion(pub std::rc::Rc<Recorder>);

impl Completion for RecordingCompletion {
    fn resolve(self: Box<Self>, result: Result<ClientOutcome, RaftError>) {
        *self.0.result.borrow_mut() = Some(result);
    }
}

pub fn recorder() -> (Box<dyn Completion>, std::rc::Rc<Recorder>) {
    let rec = std::rc::Rc::new(Recorder::default());
    (Box::new(RecordingCompletion(rec.clone())), rec)
}

/// A drop/reorder/duplicate-capable message bus: spec.md §6 requires the
/// core to tolerate all three, so the harness is built to actually exercise
/// them rather than assume a reliable network.
#[derive(Default)]
pub struct Bus {
    queue: VecDeque<(ServerId, ServerId, Message)>,
    pub drop_all_to: Option<ServerId>,
    pub drop_all_from: Option<ServerId>,
}

impl Bus {
    fn send(&mut self, from: ServerId, to: ServerId, message: Message) {
        if Some(to) == self.drop_all_to || Some(from) == self.drop_all_from {
            return;
        }
        self.queue.push_back((from, to, message));
    }

    pub fn duplicate_last(&mut self) {
        if let Some(last) = self.queue.back().cloned() {
            self.queue.push_back(last);
        }
    }

    pub fn reorder_swap_front(&mut self) {
        if self.queue.len() >= 2 {
            self.queue.swap(0, 1);
        }
    }

    /// Discard the oldest queued message outright, simulating a dropped
    /// packet the transport never redelivers.
    pub fn drop_one(&mut self) -> bool {
        self.queue.pop_front().is_some()
    }

    /// Remove and return the oldest queued message without delivering it,
    /// for callers that need to drive it through `Cluster::drive` themselves
    /// (e.g. while recording it for later replay).
    pub fn pop_front(&mut self) -> Option<(ServerId, ServerId, Message)> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// A cluster of harness nodes sharing one `Bus`. All three fault classes in
/// spec.md §6 are reachable through `Bus`; persistence and FSM application
/// are modeled as always succeeding and completing synchronously within one
/// `drive` call, which is sufficient to exercise the core's state machine
/// (collaborator latency/ordering is the host's concern, not the core's).
pub struct Cluster {
    pub nodes: BTreeMap<ServerId, Node>,
    pub bus: Bus,
}

impl Cluster {
    /// Build a cluster of `ids.len()` voters, all starting as followers in
    /// term 0 with an empty log, matching spec.md §8's "3-node cluster
    /// {A,B,C}" scenario setup.
    pub fn new(ids: &[ServerId]) -> Self {
        Cluster::with_config(ids, Config::default())
    }

    /// Like `new`, but with a caller-supplied `Config` — used by tests that
    /// need to tune e.g. `snapshot_policy_logs_since_last` to force a
    /// scenario without waiting through thousands of commits.
    pub fn with_config(ids: &[ServerId], config: Config) -> Self {
        let mut roles = BTreeMap::new();
        let mut addresses = BTreeMap::new();
        for id in ids {
            roles.insert(*id, ServerRole::Voter);
            addresses.insert(*id, format!("node-{id}"));
        }
        let membership = Membership { roles, addresses, joint: None };

        let mut nodes = BTreeMap::new();
        for id in ids {
            let core = ConsensusState::new(*id, config.clone(), membership.clone());
            nodes.insert(*id, Node { core, fsm: TestFsm::default() });
        }
        Cluster { nodes, bus: Bus::default() }
    }

    /// Drive `event` through node `id`'s `step`, then recursively resolve
    /// every task it produces: persistence and FSM tasks complete
    /// synchronously (feeding their completion event right back in);
    /// `SendMessage` tasks are queued on the bus for later delivery.
    pub fn drive(&mut self, id: ServerId, event: Event) {
        let mut work: VecDeque<(ServerId, Event)> = VecDeque::new();
        work.push_back((id, event));
        self.run(&mut work);
    }

    /// Flush tasks a direct `ConsensusState::propose`/`drain_tasks` call
    /// left queued, without itself injecting a new event.
    pub fn flush(&mut self, id: ServerId) {
        let tasks = self.nodes.get_mut(&id).unwrap().core.drain_tasks();
        let mut work = VecDeque::new();
        self.handle_tasks(id, tasks, &mut work);
        self.run(&mut work);
    }

    fn run(&mut self, work: &mut VecDeque<(ServerId, Event)>) {
        while let Some((id, event)) = work.pop_front() {
            let tasks = match self.nodes.get_mut(&id) {
                Some(node) => node.core.step(event),
                None => continue,
            };
            self.handle_tasks(id, tasks, work);
        }
    }

    fn handle_tasks(&mut self, id: ServerId, tasks: Vec<Task>, work: &mut VecDeque<(ServerId, Event)>) {
        for task in tasks {
            match task {
                Task::SendMessage { to, message, .. } => self.bus.send(id, to, message),
                Task::PersistEntries { first_index, entries } => {
                    let last_index = entries.last().map(|e| e.index()).unwrap_or(first_index.saturating_sub(1));
                    work.push_back((id, Event::PersistedEntries { first_index, last_index, status: IoStatus::Ok }));
                }
                Task::PersistTermAndVote { .. } => {
                    work.push_back((id, Event::PersistedTermVote { status: IoStatus::Ok }));
                }
                Task::PersistSnapshot { last_index, is_last, .. } => {
                    if is_last {
                        work.push_back((id, Event::PersistedSnapshot { index: last_index, status: IoStatus::Ok }));
                    }
                }
                Task::LoadSnapshot { index, offset } => {
                    work.push_back((id, Event::LoadedSnapshot { index, offset, chunk: Vec::new(), last: true, status: IoStatus::Ok }));
                }
                Task::ApplyCommand { index, payload } => {
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.fsm.applied.insert(index, payload.clone());
                    }
                    work.push_back((id, Event::CommandApplied { index, result: payload }));
                }
                Task::TakeSnapshot { index } => {
                    let term = self.nodes.get(&id).map(|n| n.core.log.term_of(index)).unwrap_or(0);
                    work.push_back((id, Event::SnapshotTaken { index, term, status: IoStatus::Ok }));
                }
                Task::RestoreSnapshot { index } => {
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.fsm.applied.retain(|idx, _| *idx > index);
                        node.fsm.restored_to = Some(index);
                    }
                }
            }
        }
    }

    /// Deliver one queued message as a `Receive` event, draining every task
    /// it causes (including further messages, which are queued for a later
    /// `deliver_all`, not delivered inline — matching a real transport,
    /// where nothing is re-entrant).
    pub fn deliver_one(&mut self) -> bool {
        let Some((from, to, message)) = self.bus.queue.pop_front() else { return false };
        self.drive(to, Event::Receive { from, message });
        true
    }

    pub fn deliver_all(&mut self) {
        while self.deliver_one() {}
    }

    /// Advance every node's clock by `elapsed_ms`, applying `timeout_ms` as
    /// the freshly-jittered election timeout for every node — a harness
    /// convenience standing in for a host that jitters per node per spec.md
    /// §4.1's Determinism note (the core never jitters on its own).
    pub fn tick_all(&mut self, elapsed_ms: u64, timeout_ms: Option<u64>) {
        let ids: Vec<ServerId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.drive(id, Event::Tick { elapsed_ms, election_timeout_ms: timeout_ms });
        }
    }

    /// Run ticks and message delivery rounds until no node has anything
    /// left to do, bounded by `max_rounds` to avoid spinning on a genuinely
    /// stuck scenario (e.g. a cluster with no reachable quorum).
    pub fn settle(&mut self, max_rounds: usize) {
        for _ in 0..max_rounds {
            self.deliver_all();
            if self.bus.is_empty() {
                break;
            }
        }
    }

    pub fn leaders(&self) -> Vec<ServerId> {
        self.nodes.iter().filter(|(_, n)| n.core.role == Role::Leader).map(|(id, _)| *id).collect()
    }

    pub fn submit_apply(&mut self, leader: ServerId, payload: Vec<u8>) -> std::rc::Rc<Recorder> {
        let (completion, rec) = recorder();
        let node = self.nodes.get_mut(&leader).unwrap();
        node.core.propose(1, ClientRequestKind::Apply { payload }, completion);
        self.flush(leader);
        rec
    }
}
