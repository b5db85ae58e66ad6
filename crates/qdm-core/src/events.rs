//! Typed notifications published by the core on a broadcast bus.
//!
//! Subscribers that fall behind see `RecvError::Lagged` and skip ahead; the
//! core never blocks on a slow listener.

use tokio::sync::broadcast;

use crate::model::{JobError, JobId, JobStatus, QueueId};

const BUS_CAPACITY: usize = 1024;

/// What a mutation touched, for views that refresh on change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeScope {
    Job(JobId),
    Queue(QueueId),
    /// Several jobs (e.g. a queue reorder).
    Jobs,
    Queues,
    /// Everything was reloaded from storage.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// Emitted once after every facade mutation.
    Changed(ChangeScope),
    JobStatusChanged {
        job_id: JobId,
        status: JobStatus,
    },
    Progress {
        job_id: JobId,
        bytes_transferred: u64,
        total_size: Option<u64>,
        bytes_per_sec: u64,
    },
    QueueStarted(QueueId),
    QueueStopped(QueueId),
    QueueFinished(QueueId),
    DownloadCompleted(JobId),
    DownloadFailed {
        job_id: JobId,
        error: JobError,
    },
    DownloadStopped(JobId),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish; having no subscribers is not an error.
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }
}
