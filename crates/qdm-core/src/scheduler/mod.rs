//! Queue scheduler: one actor task per running queue.
//!
//! Every admission and completion decision for a queue is made inside its
//! actor, so the concurrency ceiling check cannot race with a job settling.
//! The actor wakes on commands, on job outcomes and at the next schedule
//! boundary or retry due time.

mod actor;
mod select;
pub mod window;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::CoreResult;
use crate::job::JobRegistry;
use crate::model::{JobId, JobStatus, QueueId};

/// What a queue actor needs from the rest of the core.
pub struct SchedulerContext {
    pub jobs: JobRegistry,
    pub clock: Arc<dyn Clock>,
}

pub(crate) enum Command {
    Reevaluate(Option<oneshot::Sender<()>>),
    Admit {
        job_id: JobId,
        reply: oneshot::Sender<CoreResult<JobStatus>>,
    },
    Stop(oneshot::Sender<()>),
}

/// Cloneable command side of a queue actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    queue_id: QueueId,
    commands: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Ask for a re-evaluation without waiting for it.
    pub fn nudge(&self) {
        let _ = self.commands.send(Command::Reevaluate(None));
    }

    /// Re-evaluate and wait until the pass has run.
    pub async fn reevaluate(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Reevaluate(Some(tx))).is_ok() {
            let _ = rx.await;
        }
    }

    /// Start `job_id` if a slot is free, otherwise leave it for admission.
    /// A member that is already running is stopped when it does not fit.
    /// `None` when the actor has already exited.
    pub async fn admit(&self, job_id: JobId) -> Option<CoreResult<JobStatus>> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Admit { job_id, reply }).ok()?;
        rx.await.ok()
    }
}

/// Owner of a running queue actor.
pub struct QueueScheduler {
    handle: SchedulerHandle,
    task: JoinHandle<()>,
}

impl QueueScheduler {
    pub fn spawn(ctx: Arc<SchedulerContext>, queue_id: QueueId) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(actor::Actor::new(ctx, queue_id, rx).run());
        QueueScheduler {
            handle: SchedulerHandle { queue_id, commands },
            task,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// The actor exited on its own (queue finished or its window expired).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop every active member and wait for the actor to exit.
    pub async fn stop(self) {
        let (tx, rx) = oneshot::channel();
        if self.handle.commands.send(Command::Stop(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = self.task.await {
            tracing::warn!(
                queue_id = self.handle.queue_id,
                error = %e,
                "queue actor ended abnormally"
            );
        }
    }
}
