//! File job controller: the state machine of one download.
//!
//! A `JobController` owns the cached `Job` record, at most one live transfer
//! and the drive task that folds transfer events back into the record. Public
//! operations are serialized per job; every status change is persisted and
//! published before the operation returns.

mod controller;
mod drive;
mod duplicate;
mod registry;
mod state;

use std::sync::Arc;

pub use controller::JobController;
pub use duplicate::{DuplicateAction, DuplicateStrategy, FixedDuplicatePolicy};
pub use registry::JobRegistry;
pub(crate) use state::transition;

use crate::config::QdmConfig;
use crate::events::EventBus;
use crate::model::{JobError, JobId, JobStatus};
use crate::repository::Repository;
use crate::throttle::TokenBucket;

/// Collaborators shared by every controller.
pub struct JobContext {
    pub repo: Arc<dyn Repository>,
    pub events: EventBus,
    pub config: Arc<QdmConfig>,
    /// Cap across all running transfers.
    pub global_limiter: Arc<TokenBucket>,
    /// Cap across all jobs in the merge phase.
    pub merge_limiter: Arc<TokenBucket>,
}

impl JobContext {
    pub fn new(repo: Arc<dyn Repository>, config: Arc<QdmConfig>, events: EventBus) -> Self {
        JobContext {
            global_limiter: TokenBucket::shared(config.global_bytes_per_sec),
            merge_limiter: TokenBucket::shared(config.merge_bytes_per_sec),
            repo,
            events,
            config,
        }
    }
}

/// Sent to the watching scheduler whenever a job settles after a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub error: Option<JobError>,
}
