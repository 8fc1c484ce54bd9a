// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inkproof-queue
//!
//! The job queue adapter: an abstract FIFO of [`JobDescriptor`]s with
//! blocking-pop-with-timeout semantics so the worker's dispatch loop can
//! observe external cancellation promptly. [`InMemoryJobQueue`] is the
//! default, test, and single-node implementation; a durable backend (e.g. a
//! Redis list) would implement the same [`JobQueue`] trait for multi-node
//! deployments.

use async_trait::async_trait;
use inkproof_core::JobDescriptor;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Errors returned by [`JobQueue`] operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue has reached its configured maximum capacity.
    #[error("queue is full (max {max})")]
    Full {
        /// Maximum number of items the queue can hold.
        max: usize,
    },
}

/// Snapshot statistics for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of descriptors currently queued.
    pub len: usize,
    /// Maximum capacity of the queue.
    pub max: usize,
}

/// Abstract FIFO job queue.
///
/// Implementations need only guarantee FIFO ordering per producer and
/// at-least-once delivery (an in-flight crash may lose at most the job
/// currently being processed) — acceptable because jobs are idempotent with
/// respect to output naming by `job_id`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Push a descriptor onto the back of the queue.
    async fn push(&self, descriptor: JobDescriptor) -> Result<(), QueueError>;

    /// Pop the descriptor at the front of the queue, waiting up to `timeout`
    /// for one to arrive. Returns `None` on timeout (not an error) so the
    /// dispatch loop can re-check its own cancellation signal.
    async fn blocking_pop(&self, timeout: Duration) -> Option<JobDescriptor>;

    /// Return a snapshot of queue statistics.
    async fn stats(&self) -> QueueStats;
}

struct Inner {
    entries: Mutex<VecDeque<JobDescriptor>>,
    notify: Notify,
    max_size: usize,
}

/// A bounded, in-memory FIFO job queue backed by `tokio::sync::Mutex` +
/// `Notify`, the async/blocking counterpart of the teacher's synchronous
/// priority queue.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    inner: Arc<Inner>,
}

impl InMemoryJobQueue {
    /// Create a new queue with the given maximum capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                max_size,
            }),
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn push(&self, descriptor: JobDescriptor) -> Result<(), QueueError> {
        let mut entries = self.inner.entries.lock().await;
        if entries.len() >= self.inner.max_size {
            return Err(QueueError::Full {
                max: self.inner.max_size,
            });
        }
        entries.push_back(descriptor);
        drop(entries);
        self.inner.notify.notify_one();
        Ok(())
    }

    async fn blocking_pop(&self, timeout: Duration) -> Option<JobDescriptor> {
        if let Some(d) = self.inner.entries.lock().await.pop_front() {
            return Some(d);
        }

        let notified = self.inner.notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(timeout) => return None,
        }

        self.inner.entries.lock().await.pop_front()
    }

    async fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.inner.entries.lock().await.len(),
            max: self.inner.max_size,
        }
    }
}
