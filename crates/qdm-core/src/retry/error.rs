//! Chunk transfer error type for retry classification.

use thiserror::Error;

use crate::error::{CoreError, StorageError, TransferError};

/// Error returned by one attempt at a chunk.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// Disk write failed (disk full, permission denied). Not retried.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Stopped by a pause, stop or cancel signal; the bytes written so far are kept.
    #[error("interrupted")]
    Interrupted,
}

impl ChunkError {
    /// Converts to the job-level error. `Interrupted` has no job-level meaning
    /// and maps to `None`.
    pub fn into_core(self) -> Option<CoreError> {
        match self {
            ChunkError::Transfer(e) => Some(CoreError::Transfer(e)),
            ChunkError::Storage(e) => Some(CoreError::Storage(e)),
            ChunkError::Interrupted => None,
        }
    }
}
