//! In-process queue backend.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::QueueBackend;

#[derive(Default)]
struct Lists {
    queued: VecDeque<String>,
    processing: Vec<String>,
}

/// Bounded in-memory two-list queue.
///
/// Visible only within one process, so it is the test and demo backend;
/// real deployments use [`super::RedisQueue`]. Claim ordering and
/// capacity semantics match the durable backend exactly.
pub struct MemoryQueue {
    lists: Mutex<Lists>,
    notify: Condvar,
    max_size: usize,
}

impl MemoryQueue {
    /// Create a queue bounded at `max_size` jobs (queued + processing).
    pub fn new(max_size: usize) -> Self {
        Self {
            lists: Mutex::new(Lists::default()),
            notify: Condvar::new(),
            max_size,
        }
    }
}

impl QueueBackend for MemoryQueue {
    fn push(&self, id: &str) -> bool {
        let mut lists = self.lists.lock();
        if lists.queued.len() + lists.processing.len() >= self.max_size {
            return false;
        }
        lists.queued.push_back(id.to_string());
        self.notify.notify_one();
        true
    }

    fn pend(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut lists = self.lists.lock();
        loop {
            if let Some(id) = lists.queued.pop_front() {
                lists.processing.push(id.clone());
                return Some(id);
            }
            if self.notify.wait_until(&mut lists, deadline).timed_out() {
                // One last check: a push may have raced the timeout.
                let id = lists.queued.pop_front()?;
                lists.processing.push(id.clone());
                return Some(id);
            }
        }
    }

    fn pop(&self, id: &str) -> bool {
        let mut lists = self.lists.lock();
        match lists.processing.iter().position(|p| p == id) {
            Some(index) => {
                lists.processing.remove(index);
                true
            }
            None => false,
        }
    }

    fn size(&self) -> usize {
        let lists = self.lists.lock();
        lists.queued.len() + lists.processing.len()
    }

    fn queued_size(&self) -> usize {
        self.lists.lock().queued.len()
    }

    fn processing_size(&self) -> usize {
        self.lists.lock().processing.len()
    }

    fn requeue_processing(&self) -> usize {
        let mut lists = self.lists.lock();
        let moved = lists.processing.len();
        // processing is in claim order, so draining front-to-back keeps
        // the earliest-claimed job first among the requeued ones.
        let requeued: Vec<String> = lists.processing.drain(..).collect();
        lists.queued.extend(requeued);
        if moved > 0 {
            self.notify.notify_all();
        }
        moved
    }

    fn clear(&self) {
        let mut lists = self.lists.lock();
        lists.queued.clear();
        lists.processing.clear();
    }

    fn peek_queued(&self) -> Option<String> {
        self.lists.lock().queued.front().cloned()
    }

    fn peek_processing(&self) -> Option<String> {
        self.lists.lock().processing.first().cloned()
    }
}
