//! Typed errors raised by the core.
//!
//! `TransferError` covers network-side failures (retryable), `StorageError`
//! covers local disk failures (never retried automatically) and `CoreError` is
//! what every public operation returns.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{FailureKind, JobId, JobStatus, QueueId};

/// Network-side failure of a probe, chunk transfer or post-merge verification.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("curl: {0}")]
    Curl(curl::Error),
    #[error("HTTP {0}")]
    Http(u32),
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    #[error("invalid range response: {0}")]
    InvalidRangeResponse(String),
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Local disk failure, with the path and the action that failed.
#[derive(Debug, Error)]
#[error("failed to {action} {}", path.display())]
pub struct StorageError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl StorageError {
    pub fn new(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Error returned by job, queue and facade operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("resume unsupported: {0}")]
    ResumeUnsupported(String),
    #[error("scheduling error: {0}")]
    Scheduling(String),
    #[error("duplicate download: {url} already exists as job {existing}")]
    DuplicateConflict { url: String, existing: JobId },
    #[error("job {job_id}: cannot go from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("queue {0} not found")]
    QueueNotFound(QueueId),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("persistence: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl CoreError {
    /// Kind recorded in `Job::last_error` and used for retry decisions.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CoreError::Transfer(_) => FailureKind::Transfer,
            CoreError::Storage(_) => FailureKind::Storage,
            CoreError::ResumeUnsupported(_) => FailureKind::ResumeUnsupported,
            CoreError::Scheduling(_) => FailureKind::Scheduling,
            _ => FailureKind::Other,
        }
    }

    /// Message with the full source chain, for logs and `last_error`.
    pub fn chain_message(&self) -> String {
        let mut msg = self.to_string();
        let mut cur = std::error::Error::source(self);
        while let Some(e) = cur {
            msg.push_str(": ");
            msg.push_str(&e.to_string());
            cur = e.source();
        }
        msg
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_chain_includes_io_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CoreError::from(StorageError::new("create", Path::new("/x/y.part"), io));
        assert_eq!(err.failure_kind(), FailureKind::Storage);
        let msg = err.chain_message();
        assert!(msg.contains("failed to create /x/y.part"), "{msg}");
        assert!(msg.ends_with("denied"), "{msg}");
    }

    #[test]
    fn retryable_kinds() {
        assert!(CoreError::from(TransferError::Http(503)).failure_kind().is_retryable());
        assert!(CoreError::ResumeUnsupported("etag changed".into())
            .failure_kind()
            .is_retryable());
        assert!(!CoreError::Scheduling("bad dir".into()).failure_kind().is_retryable());
        assert!(!CoreError::JobNotFound(3).failure_kind().is_retryable());
    }
}
