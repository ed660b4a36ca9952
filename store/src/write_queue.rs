//! The serializing write queue.
//!
//! Every ledger writer requests a ticket and blocks until it reaches the
//! head of the queue, guaranteeing FIFO admission across writer classes.
//! The guard pops the queue and wakes waiters when dropped, after the
//! caller has committed its write transaction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Distinct areas that take the exclusive write lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Writer {
    ProcessBatch,
    ConfirmationHeight,
    Testing,
}

struct Shared {
    queue: Mutex<VecDeque<Writer>>,
    condition: Condvar,
    stopped: AtomicBool,
}

/// FIFO queue of pending writers.
#[derive(Clone)]
pub struct WriteQueue {
    shared: Arc<Shared>,
}

/// Held while a writer owns the head of the queue. Dropping pops the queue
/// and wakes the next writer.
pub struct WriteGuard {
    shared: Arc<Shared>,
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                condition: Condvar::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Block until `writer` is at the head of the queue.
    pub fn wait(&self, writer: Writer) -> WriteGuard {
        let mut queue = self.shared.queue.lock().unwrap();
        if !queue.contains(&writer) {
            queue.push_back(writer);
        }
        while !self.shared.stopped.load(Ordering::SeqCst) && queue.front() != Some(&writer) {
            queue = self.shared.condition.wait(queue).unwrap();
        }
        WriteGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Enqueue `writer` if absent and report whether it is now at the head.
    /// A `true` result must be followed by [`WriteQueue::pop`] to obtain the
    /// guard.
    pub fn process(&self, writer: Writer) -> bool {
        let mut queue = self.shared.queue.lock().unwrap();
        if !queue.contains(&writer) {
            queue.push_back(writer);
        }
        queue.front() == Some(&writer)
    }

    /// The guard for a writer that [`WriteQueue::process`] admitted.
    pub fn pop(&self) -> WriteGuard {
        WriteGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether `writer` is waiting or active.
    pub fn contains(&self, writer: Writer) -> bool {
        self.shared.queue.lock().unwrap().contains(&writer)
    }

    /// Release every blocked waiter; subsequent waits return immediately.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.condition.notify_all();
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.pop_front();
        drop(queue);
        self.shared.condition.notify_all();
    }
}
