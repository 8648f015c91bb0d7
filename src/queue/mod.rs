//! Durable two-list job queue.
//!
//! Jobs move between two ordered lists: `queued` (waiting) and
//! `processing` (claimed by a dispatcher, not yet finalized). A claim is
//! a single atomic move so that under concurrent dispatchers each id is
//! handed out exactly once. Completion removes the id from `processing`;
//! a dispatcher crash leaves its ids parked there until an operator runs
//! [`QueueBackend::requeue_processing`].
//!
//! Two backends: an in-process [`MemoryQueue`] for single-process runs
//! and tests, and a Redis-backed [`RedisQueue`] for durable deployments.
//! Callers depend only on the [`QueueBackend`] trait.

use std::time::Duration;

mod memory;
mod redis;

pub use memory::MemoryQueue;
pub use redis::RedisQueue;

/// Queue operations shared by all backends.
///
/// Storage failures never propagate out of these methods: a backend that
/// cannot reach its store logs the failure and returns the safe default
/// (`false`, `None`, `0`).
pub trait QueueBackend: Send + Sync {
    /// Enqueue a job id. Returns false when the queue is at capacity
    /// (counting both queued and processing jobs) or storage is down.
    fn push(&self, id: &str) -> bool;

    /// Claim the oldest queued id, moving it atomically to `processing`.
    /// Blocks up to `timeout` waiting for a job; `None` on timeout.
    fn pend(&self, timeout: Duration) -> Option<String>;

    /// Remove a completed id from `processing`. Returns false when the
    /// id was not there.
    fn pop(&self, id: &str) -> bool;

    /// Total jobs tracked (queued + processing).
    fn size(&self) -> usize;

    /// Jobs waiting to be claimed.
    fn queued_size(&self) -> usize;

    /// Jobs claimed but not yet finalized.
    fn processing_size(&self) -> usize;

    /// Operator recovery: move everything in `processing` back to the
    /// tail of `queued`, preserving claim order. Returns the count moved.
    fn requeue_processing(&self) -> usize;

    /// Operator reset: drop all queued and processing ids.
    fn clear(&self);

    /// Next id `pend` would return, without claiming it.
    fn peek_queued(&self) -> Option<String>;

    /// Oldest claimed id still in `processing`.
    fn peek_processing(&self) -> Option<String>;
}
