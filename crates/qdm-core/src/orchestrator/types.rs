use std::path::PathBuf;

use crate::model::{Queue, QueueId, Schedule};

/// Request to create a job.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub url: String,
    /// Derived from the URL when absent.
    pub file_name: Option<String>,
    /// Wins over the category directory and the default download dir.
    pub save_dir: Option<PathBuf>,
    /// Category name; inferred from the file extension when absent.
    pub category: Option<String>,
    pub queue_id: Option<QueueId>,
    pub expected_sha256: Option<String>,
    pub speed_limit: Option<u64>,
}

impl NewJob {
    pub fn new(url: impl Into<String>) -> Self {
        NewJob {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Request to create a queue.
#[derive(Debug, Clone)]
pub struct NewQueue {
    pub title: String,
    pub concurrency: u32,
    pub schedule: Schedule,
    pub retry_on_failure: bool,
    pub retry_count: u32,
    pub include_paused: bool,
}

impl NewQueue {
    pub fn new(title: impl Into<String>) -> Self {
        NewQueue {
            title: title.into(),
            concurrency: 1,
            schedule: Schedule::always(),
            retry_on_failure: false,
            retry_count: 0,
            include_paused: false,
        }
    }
}

/// Field-by-field queue edit; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct QueueUpdate {
    pub title: Option<String>,
    pub concurrency: Option<u32>,
    pub schedule: Option<Schedule>,
    pub retry_on_failure: Option<bool>,
    pub retry_count: Option<u32>,
    pub include_paused: Option<bool>,
}

impl QueueUpdate {
    /// Apply the set fields. Running state, id and the default flag are
    /// never touched here.
    pub fn apply(&self, queue: &mut Queue) {
        if let Some(title) = &self.title {
            queue.title = title.clone();
        }
        if let Some(concurrency) = self.concurrency {
            queue.concurrency = concurrency;
        }
        if let Some(schedule) = &self.schedule {
            queue.schedule = schedule.clone();
        }
        if let Some(retry) = self.retry_on_failure {
            queue.retry_on_failure = retry;
        }
        if let Some(count) = self.retry_count {
            queue.retry_count = count;
        }
        if let Some(include) = self.include_paused {
            queue.include_paused = include;
        }
        queue.touch();
    }
}
