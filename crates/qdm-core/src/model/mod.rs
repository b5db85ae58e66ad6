//! Data model shared by the transfer engine, job controller, scheduler and
//! repository: jobs, queues, schedules and the job status state machine.

mod job;
mod queue;
mod status;

pub use job::{FailureKind, Job, JobError, JobFilter, JobId};
pub use queue::{Queue, QueueId, Schedule};
pub use status::JobStatus;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix seconds (for record timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
