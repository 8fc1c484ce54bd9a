// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inkproof-store
//!
//! The job status store: a key-value store with per-entry TTLs, holding the
//! short-lived [`JobRecord`] and compile-log text keyed by `job_id`. This is
//! a progress/observability channel, not the system of record for completed
//! jobs.

use inkproof_core::JobRecord;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Errors returned by [`JobStatusStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the given job id (either never written or expired).
    #[error("job {0} not found")]
    NotFound(String),
}

/// Key-value store with TTL for job status and compile logs.
#[async_trait::async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Write (or overwrite) the status record for `job_id`, with a fresh TTL.
    async fn set_status(&self, job_id: &str, record: JobRecord, ttl: Duration);

    /// Fetch the status record for `job_id`, if present and unexpired.
    async fn get_status(&self, job_id: &str) -> Result<JobRecord, StoreError>;

    /// Write (or overwrite) the compile log text for `job_id`, with a fresh TTL.
    async fn set_logs(&self, job_id: &str, text: String, ttl: Duration);

    /// Fetch the compile log text for `job_id`, if present and unexpired.
    async fn get_logs(&self, job_id: &str) -> Result<String, StoreError>;
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct Tables {
    status: HashMap<String, Entry<JobRecord>>,
    logs: HashMap<String, Entry<String>>,
}

/// In-memory, TTL-aware implementation of [`JobStatusStore`].
///
/// Expired entries are swept lazily on read and periodically by
/// [`TtlStore::spawn_sweeper`], mirroring the `compile:status:`/`compile:log:`
/// key prefixes and default TTLs (1h / 24h) of the reference implementation.
#[derive(Clone)]
pub struct TtlStore {
    tables: Arc<RwLock<Tables>>,
}

impl TtlStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables {
                status: HashMap::new(),
                logs: HashMap::new(),
            })),
        }
    }

    /// Spawn a background task that periodically evicts expired entries.
    ///
    /// Returns a [`tokio::task::JoinHandle`] the caller may abort on shutdown.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let tables = Arc::clone(&self.tables);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let mut guard = tables.write().await;
                let before = guard.status.len() + guard.logs.len();
                guard.status.retain(|_, e| !e.is_expired(now));
                guard.logs.retain(|_, e| !e.is_expired(now));
                let removed = before - (guard.status.len() + guard.logs.len());
                if removed > 0 {
                    debug!(removed, "swept expired store entries");
                }
            }
        })
    }
}

impl Default for TtlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JobStatusStore for TtlStore {
    async fn set_status(&self, job_id: &str, record: JobRecord, ttl: Duration) {
        let mut guard = self.tables.write().await;
        guard.status.insert(
            job_id.to_string(),
            Entry {
                value: record,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn get_status(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        let guard = self.tables.read().await;
        match guard.status.get(job_id) {
            Some(entry) if !entry.is_expired(Instant::now()) => Ok(entry.value.clone()),
            _ => Err(StoreError::NotFound(job_id.to_string())),
        }
    }

    async fn set_logs(&self, job_id: &str, text: String, ttl: Duration) {
        let mut guard = self.tables.write().await;
        guard.logs.insert(
            job_id.to_string(),
            Entry {
                value: text,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn get_logs(&self, job_id: &str) -> Result<String, StoreError> {
        let guard = self.tables.read().await;
        match guard.logs.get(job_id) {
            Some(entry) if !entry.is_expired(Instant::now()) => Ok(entry.value.clone()),
            _ => Err(StoreError::NotFound(job_id.to_string())),
        }
    }
}
