//! Transfer engine: moves the bytes of one job from the source into chunk
//! files over parallel HTTP range requests, then assembles the final file.
//!
//! Each unfinished chunk gets its own libcurl `Easy2` handle on its own OS
//! thread, all driven from one `spawn_blocking` task. Pause, stop and cancel
//! are cooperative: the signal is checked on every write and every libcurl
//! progress callback, and a chunk file is flushed before its offset counts.

mod control;
mod engine;
mod handler;
mod merge;
mod resume;
mod worker;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use control::{Signal, TransferControl};
pub use engine::{start, Transfer};
pub use merge::merge_chunks;
pub use resume::check_resume;

use crate::error::{CoreError, TransferError};
use crate::fetch_head::{self, RemoteInfo};
use crate::model::JobId;
use crate::retry::RetryPolicy;
use crate::segmenter::Chunk;
use crate::throttle::Limiters;

/// Everything a transfer needs; built by the job controller.
#[derive(Clone)]
pub struct TransferPlan {
    pub job_id: JobId,
    pub url: String,
    pub final_path: PathBuf,
    pub chunks: Vec<Chunk>,
    /// Source honors ranges; chunk retries continue from their offset.
    pub ranged: bool,
    /// Per-job and global buckets.
    pub limiters: Limiters,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub progress_interval: Duration,
}

#[derive(Debug)]
pub enum TransferEvent {
    /// Sum of bytes on disk across all chunks.
    Progress { received: u64 },
    ChunkClosed { index: usize, received: u64 },
    /// Last event; carries the chunk offsets at the moment every worker stopped.
    Finished {
        outcome: TransferOutcome,
        chunks: Vec<Chunk>,
    },
}

#[derive(Debug)]
pub enum TransferOutcome {
    /// Every chunk is closed and flushed.
    Completed,
    Interrupted(Signal),
    Failed(CoreError),
}

/// Probe the source from async code.
pub async fn probe(url: &str, connect_timeout: Duration) -> Result<RemoteInfo, CoreError> {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || fetch_head::probe(&url, connect_timeout))
        .await
        .map_err(|e| TransferError::Probe(format!("probe task failed: {}", e)))?
        .map_err(CoreError::from)
}

/// Run `merge_chunks` on the blocking pool.
pub async fn merge(
    final_path: &Path,
    chunks: Vec<Chunk>,
    limiters: Limiters,
    control: TransferControl,
) -> Result<u64, CoreError> {
    let final_path = final_path.to_path_buf();
    tokio::task::spawn_blocking(move || merge_chunks(&final_path, &chunks, &limiters, &control))
        .await
        .map_err(|e| CoreError::Invalid(format!("merge task failed: {}", e)))?
}
