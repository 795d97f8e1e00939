//! The task queue: an ordered output buffer of side-effect descriptors
//! produced during one `step` call (spec.md §4.6).

use crate::entry::Entry;
use crate::error::RaftError;
use crate::event::Message;
use crate::membership::Membership;
use crate::raft_types::Index;
use crate::raft_types::Term;
use crate::ServerId;

/// A descriptor of externally-performed work. The core never executes a
/// task itself; the host is responsible for running it and, for every task
/// that has one, delivering the matching completion event back in FIFO
/// order per `(kind, target)` (spec.md §4.6).
#[derive(Debug, Clone)]
pub enum Task {
    SendMessage { to: ServerId, address: String, message: Message },
    PersistEntries { first_index: Index, entries: Vec<Entry> },
    PersistTermAndVote { term: Term, voted_for: Option<ServerId> },
    PersistSnapshot { last_index: Index, last_term: Term, configuration: Membership, offset: usize, data: Vec<u8>, is_last: bool },
    LoadSnapshot { index: Index, offset: usize },
    ApplyCommand { index: Index, payload: Vec<u8> },
    TakeSnapshot { index: Index },
    RestoreSnapshot { index: Index },
}

/// An ordered buffer of `Task`s accumulated during one `step` call.
///
/// `push` keeps the fallible signature the original C `task.h` constructors
/// have (`TaskSendMessage` et al. can return `RAFT_NOMEM`) even though a
/// growable `Vec` only fails that way under real allocator exhaustion —
/// preserving the contract lets a future bounded-queue host policy
/// reintroduce backpressure without changing this type's API.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    tasks: Vec<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue::default()
    }

    pub fn push(&mut self, task: Task) -> Result<(), RaftError> {
        self.tasks.push(task);
        Ok(())
    }

    pub fn drain(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.tasks)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}
