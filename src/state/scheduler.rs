//! Cancellable deadline scheduler
//!
//! Every delayed action is a tracked task with an id. Tasks never run on
//! their own; the owner polls `pop_due` from its serialized loop, so a
//! cancelled task can never fire.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;

/// Handle of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// A task whose deadline has passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTask<T> {
    pub id: TaskId,
    pub deadline: Instant,
    pub payload: T,
}

#[derive(Debug)]
pub struct Scheduler<T> {
    next_id: u64,
    queue: BTreeMap<(Instant, TaskId), T>,
    deadlines: HashMap<TaskId, Instant>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `payload` to become due at `deadline`
    pub fn schedule(&mut self, deadline: Instant, payload: T) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.queue.insert((deadline, id), payload);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancel a task. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.queue.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    /// Cancel every outstanding task, returning how many were dropped
    pub fn cancel_all(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        self.deadlines.clear();
        count
    }

    /// Earliest outstanding deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return every task due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<DueTask<T>> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            let (deadline, id) = *entry.key();
            if deadline > now {
                break;
            }
            let payload = entry.remove();
            self.deadlines.remove(&id);
            due.push(DueTask {
                id,
                deadline,
                payload,
            });
        }
        due
    }
}
