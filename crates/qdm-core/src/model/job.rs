use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{unix_timestamp, JobStatus, QueueId};
use crate::error::CoreError;
use crate::segmenter::Chunk;

pub type JobId = i64;

/// Category of the failure that put a job into `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transfer,
    Storage,
    ResumeUnsupported,
    Scheduling,
    Other,
}

impl FailureKind {
    /// Only network-side failures are worth another automatic attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Transfer | FailureKind::ResumeUnsupported)
    }
}

/// Last failure of a job, kept visible after the job enters `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&CoreError> for JobError {
    fn from(e: &CoreError) -> Self {
        JobError {
            kind: e.failure_kind(),
            message: e.chain_message(),
        }
    }
}

/// One download: a URL, where it lands and how far it got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub file_name: String,
    pub save_dir: PathBuf,
    pub total_size: Option<u64>,
    pub bytes_transferred: u64,
    pub status: JobStatus,
    pub queue_id: Option<QueueId>,
    pub priority: u32,
    pub retry_attempts: u32,
    /// Per-job bytes/sec override; `None` uses the configured default.
    pub speed_limit: Option<u64>,
    pub category: Option<String>,
    /// Source accepted range requests when the current transfer started.
    pub resumable: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub expected_sha256: Option<String>,
    pub chunks: Vec<Chunk>,
    pub last_error: Option<JobError>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    /// New unsaved job (id 0 until the repository assigns one).
    pub fn new(url: impl Into<String>, file_name: impl Into<String>, save_dir: PathBuf) -> Self {
        let now = unix_timestamp();
        Job {
            id: 0,
            url: url.into(),
            file_name: file_name.into(),
            save_dir,
            total_size: None,
            bytes_transferred: 0,
            status: JobStatus::Idle,
            queue_id: None,
            priority: 0,
            retry_attempts: 0,
            speed_limit: None,
            category: None,
            resumable: false,
            etag: None,
            last_modified: None,
            expected_sha256: None,
            chunks: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn final_path(&self) -> PathBuf {
        self.save_dir.join(&self.file_name)
    }

    /// Fraction complete in `[0, 1]`, when the size is known.
    pub fn progress(&self) -> Option<f64> {
        match self.total_size {
            Some(0) => Some(1.0),
            Some(t) => Some((self.bytes_transferred as f64 / t as f64).min(1.0)),
            None => None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = unix_timestamp();
    }

    /// Drop transfer bookkeeping so the next start begins at byte zero.
    pub(crate) fn clear_progress(&mut self) {
        self.chunks.clear();
        self.bytes_transferred = 0;
        self.resumable = false;
        self.etag = None;
        self.last_modified = None;
    }
}

/// Predicate for `Repository::list_jobs`. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub queue_id: Option<QueueId>,
    pub unassigned: bool,
    pub statuses: Vec<JobStatus>,
    pub url: Option<String>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_queue(queue_id: QueueId) -> Self {
        JobFilter {
            queue_id: Some(queue_id),
            ..Self::default()
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        JobFilter {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[JobStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        if let Some(q) = self.queue_id {
            if job.queue_id != Some(q) {
                return false;
            }
        }
        if self.unassigned && job.queue_id.is_some() {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&job.status) {
            return false;
        }
        match &self.url {
            Some(u) => job.url == *u,
            None => true,
        }
    }
}
