//! Blocking double-ended task queue shared between the rebuild lane and
//! the drain lane.
//!
//! The rebuild publishes a whole plan at once with [`replace`](TaskQueue::replace);
//! the drain loop pulls one task at a time from the tail with
//! [`take_next`](TaskQueue::take_next), parking on a condvar while the
//! queue is empty – it never busy-spins.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::task::Task;

/// Shared plan queue.  Drained at the tail; rebuilt by wholesale
/// replacement.
#[derive(Default)]
pub struct TaskQueue {
    deque: Mutex<VecDeque<Task>>,
    added: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the queue's contents with a new plan and wake the
    /// drain lane.
    pub fn replace(&self, plan: VecDeque<Task>) {
        let mut deque = self.deque.lock();
        *deque = plan;
        self.added.notify_all();
    }

    /// Pop one task from the tail, blocking up to `timeout` while the queue
    /// is empty.  Returns `None` on timeout so the caller can re-check its
    /// stop condition.
    pub fn take_next(&self, timeout: Duration) -> Option<Task> {
        let deadline = Instant::now() + timeout;
        let mut deque = self.deque.lock();
        loop {
            if let Some(task) = deque.pop_back() {
                return Some(task);
            }
            if self.added.wait_until(&mut deque, deadline).timed_out() {
                return deque.pop_back();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deque.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.deque.lock().len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
