//! Deferred task scheduling.
//!
//! A single thread sleeps until the earliest deadline and runs the task on
//! its own stack. Tasks re-arm themselves for recurring work.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send>;

struct Entry {
    deadline: Instant,
    /// Tie-breaker so entries with equal deadlines keep insertion order.
    sequence: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.sequence.cmp(&other.sequence))
    }
}

pub struct Alarm {
    queue: Mutex<BinaryHeap<Reverse<Entry>>>,
    condition: Condvar,
    stopped: AtomicBool,
    sequence: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Alarm {
    pub fn new() -> Arc<Self> {
        let alarm = Arc::new(Self {
            queue: Mutex::new(BinaryHeap::new()),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            thread: Mutex::new(None),
        });
        let runner = Arc::clone(&alarm);
        let handle = std::thread::Builder::new()
            .name("alarm".into())
            .spawn(move || runner.run())
            .expect("spawning the alarm thread");
        *alarm.thread.lock().unwrap() = Some(handle);
        alarm
    }

    /// Run `task` once `delay` has elapsed.
    pub fn add(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        let entry = Entry {
            deadline: Instant::now() + delay,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            task: Box::new(task),
        };
        self.queue.lock().unwrap().push(Reverse(entry));
        self.condition.notify_all();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn run(&self) {
        let mut queue = self.queue.lock().unwrap();
        while !self.stopped.load(Ordering::SeqCst) {
            match queue.peek() {
                Some(Reverse(next)) => {
                    let now = Instant::now();
                    if next.deadline <= now {
                        let Reverse(entry) = queue.pop().expect("peeked entry is present");
                        drop(queue);
                        (entry.task)();
                        queue = self.queue.lock().unwrap();
                    } else {
                        let wait = next.deadline - now;
                        queue = self.condition.wait_timeout(queue, wait).unwrap().0;
                    }
                }
                None => {
                    queue = self.condition.wait(queue).unwrap();
                }
            }
        }
    }
}
