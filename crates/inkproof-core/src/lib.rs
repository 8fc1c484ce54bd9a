// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inkproof-core
//!
//! Shared data model for the compile-job service: the job record persisted
//! in the status store, the descriptor handed to the job queue, and the
//! status state machine both sides agree on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of attempts a job is allowed before an external supervisor
/// gives up on re-enqueuing it. The worker itself never retries.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Lifecycle status of a compile job.
///
/// Transitions only move forward along `Queued -> Running -> (Success |
/// Failed)`; a terminal status is never revisited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Currently executing in the sandbox.
    Running,
    /// Completed with a usable PDF.
    Success,
    /// Completed without a usable PDF.
    Failed,
}

impl JobStatus {
    /// Returns `true` if this status is terminal (`Success` or `Failed`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns the set of statuses that are valid successors of `self`.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Queued => &[Self::Running],
            Self::Running => &[Self::Success, Self::Failed],
            Self::Success | Self::Failed => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Errors produced by [`JobRecord`] state transitions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    /// The requested transition is not a valid successor of the current status.
    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },
}

/// A job descriptor as pushed to the job queue and consumed by the worker.
///
/// Field names are camelCase on the wire to match the queue payload format
/// shared with the rest of the platform (`jobId, userId, sourceBucket,
/// sourceObject, mainFile, docId`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Unique job identifier.
    #[serde(rename = "jobId")]
    pub job_id: String,
    /// Principal that submitted the job, if known.
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Bucket holding the source archive.
    #[serde(rename = "sourceBucket")]
    pub source_bucket: String,
    /// Object key of the source archive within `source_bucket`.
    #[serde(rename = "sourceObject")]
    pub source_object: String,
    /// Entry file name requested by the submitter (may be empty).
    #[serde(rename = "mainFile", default)]
    pub main_file: String,
    /// Opaque project/document identifier, if known.
    #[serde(rename = "docId", default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
}

/// Persisted record of a compile job's lifecycle, as tracked by the status store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier.
    pub job_id: String,
    /// Principal that submitted the job, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Opaque project/document identifier, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    /// Bucket holding the source archive.
    pub source_bucket: String,
    /// Object key of the source archive.
    pub source_object: String,
    /// Entry file name requested by the submitter.
    #[serde(default)]
    pub main_file: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// When the job was created (enqueued).
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Human-readable cause, set iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Reference to the produced PDF, set iff `status == Success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    /// Number of processing attempts made so far.
    #[serde(default)]
    pub attempts: u32,
    /// Maximum attempts an external supervisor is allowed to make.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl JobRecord {
    /// Create a freshly-queued record for `descriptor`.
    pub fn queued(descriptor: &JobDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            job_id: descriptor.job_id.clone(),
            user_id: descriptor.user_id.clone(),
            doc_id: descriptor.doc_id.clone(),
            source_bucket: descriptor.source_bucket.clone(),
            source_object: descriptor.source_object.clone(),
            main_file: descriptor.main_file.clone(),
            status: JobStatus::Queued,
            created_at: now,
            finished_at: None,
            error_message: None,
            pdf_url: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Transition to `Running`. Fails if the job is already terminal.
    pub fn mark_running(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Running)
    }

    /// Transition to `Success`, recording `pdf_url`.
    pub fn mark_success(&mut self, pdf_url: String, now: DateTime<Utc>) -> Result<(), JobError> {
        self.transition(JobStatus::Success)?;
        self.pdf_url = Some(pdf_url);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Transition to `Failed`, recording `error_message`.
    ///
    /// A job already in a terminal state is never demoted: if this job has
    /// already reached `Success` or `Failed`, the call is a silent no-op
    /// rather than an error, since a worker racing a late failure against an
    /// already-recorded terminal status must not regress it.
    pub fn mark_failed(&mut self, error_message: String, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(error_message);
        self.finished_at = Some(now);
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Generate a fresh job id (UUID v4).
pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}
