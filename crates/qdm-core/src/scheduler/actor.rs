use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::select::{self, How};
use super::{window, Command, SchedulerContext};
use crate::error::{CoreError, CoreResult};
use crate::events::{ChangeScope, CoreEvent};
use crate::job::{JobController, JobOutcome};
use crate::model::{Job, JobFilter, JobId, JobStatus, Queue, QueueId};

/// Longest the actor sleeps without re-checking the window.
const MAX_SLEEP: Duration = Duration::from_secs(60);
/// Pause after a repository failure before trying again.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

enum Step {
    Wait(Option<Duration>),
    Finished,
    Halted,
}

pub(super) struct Actor {
    ctx: Arc<SchedulerContext>,
    queue_id: QueueId,
    commands: mpsc::UnboundedReceiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<JobOutcome>,
    outcomes: mpsc::UnboundedReceiver<JobOutcome>,
    /// Error members waiting for an automatic retry.
    retry_at: HashMap<JobId, Instant>,
    /// Stopped/Paused/Error members allowed back in at the next admission.
    revive: HashSet<JobId>,
    window_open: Option<bool>,
    acks: Vec<tokio::sync::oneshot::Sender<()>>,
}

fn earliest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

impl Actor {
    pub(super) fn new(
        ctx: Arc<SchedulerContext>,
        queue_id: QueueId,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (outcomes_tx, outcomes) = mpsc::unbounded_channel();
        Actor {
            ctx,
            queue_id,
            commands,
            outcomes_tx,
            outcomes,
            retry_at: HashMap::new(),
            revive: HashSet::new(),
            window_open: None,
            acks: Vec::new(),
        }
    }

    pub(super) async fn run(mut self) {
        tracing::info!(queue_id = self.queue_id, "queue scheduler running");
        loop {
            let step = match self.evaluate().await {
                Ok(step) => step,
                Err(e) => {
                    tracing::warn!(queue_id = self.queue_id, error = %e, "queue evaluation failed");
                    Step::Wait(Some(ERROR_BACKOFF))
                }
            };
            for ack in self.acks.drain(..) {
                let _ = ack.send(());
            }
            let wait = match step {
                Step::Finished => {
                    tracing::info!(queue_id = self.queue_id, "queue finished");
                    self.finish(CoreEvent::QueueFinished(self.queue_id), true).await;
                    return;
                }
                Step::Halted => {
                    self.stop_members().await;
                    self.finish(CoreEvent::QueueStopped(self.queue_id), true).await;
                    return;
                }
                Step::Wait(wait) => wait.map_or(MAX_SLEEP, |w| w.min(MAX_SLEEP)),
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    None => {
                        self.release_watchers().await;
                        return;
                    }
                    Some(Command::Reevaluate(ack)) => self.acks.extend(ack),
                    Some(Command::Admit { job_id, reply }) => {
                        let result = self.admit(job_id).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Stop(ack)) => {
                        self.stop_members().await;
                        self.finish(CoreEvent::QueueStopped(self.queue_id), false).await;
                        tracing::info!(queue_id = self.queue_id, "queue stopped");
                        let _ = ack.send(());
                        return;
                    }
                },
                Some(outcome) = self.outcomes.recv() => self.on_outcome(outcome).await,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn queue(&self) -> CoreResult<Option<Queue>> {
        let repo = &self.ctx.jobs.context().repo;
        repo.get_queue(self.queue_id)
            .await
            .map_err(CoreError::Persistence)
    }

    async fn members(&self) -> CoreResult<Vec<Job>> {
        let repo = &self.ctx.jobs.context().repo;
        repo.list_jobs(&JobFilter::in_queue(self.queue_id))
            .await
            .map_err(CoreError::Persistence)
    }

    async fn controller(&self, id: JobId) -> CoreResult<JobController> {
        let controller = self.ctx.jobs.get(id).await?;
        controller.set_watcher(Some(self.outcomes_tx.clone()));
        Ok(controller)
    }

    fn seed_revive(&mut self, queue: &Queue, members: &[Job]) {
        self.revive.extend(
            members
                .iter()
                .filter(|j| {
                    j.status == JobStatus::Stopped
                        || (queue.include_paused && j.status == JobStatus::Paused)
                })
                .map(|j| j.id),
        );
    }

    async fn evaluate(&mut self) -> CoreResult<Step> {
        self.drain_outcomes().await;
        let Some(queue) = self.queue().await? else {
            tracing::debug!(queue_id = self.queue_id, "queue no longer exists");
            return Ok(Step::Halted);
        };
        let now = self.ctx.clock.now();
        if window::has_expired(&queue.schedule, now) {
            let err = CoreError::Scheduling(format!(
                "schedule of queue '{}' ended and cannot open again",
                queue.title
            ));
            tracing::error!(queue_id = self.queue_id, error = %err, "stopping queue");
            return Ok(Step::Halted);
        }

        let members = self.members().await?;
        for job in &members {
            self.controller(job.id).await?;
        }
        let member_ids: HashSet<JobId> = members.iter().map(|j| j.id).collect();
        self.revive.retain(|id| member_ids.contains(id));
        self.retry_at.retain(|id, _| {
            members
                .iter()
                .any(|j| j.id == *id && j.status == JobStatus::Error)
        });

        let open = window::is_open(&queue.schedule, now);
        if open && self.window_open != Some(true) {
            self.seed_revive(&queue, &members);
        }
        self.window_open = Some(open);
        let boundary = window::next_boundary(&queue.schedule, now)
            .map(|b| (b - now).to_std().unwrap_or_default());

        if !open {
            for job in members.iter().filter(|j| j.status.is_active()) {
                tracing::info!(job_id = job.id, queue_id = self.queue_id, "window closed, stopping");
                if let Err(e) = self.controller(job.id).await?.stop().await {
                    tracing::warn!(job_id = job.id, error = %e, "failed to stop job");
                }
                self.revive.insert(job.id);
            }
            return Ok(Step::Wait(boundary));
        }

        let now_instant = Instant::now();
        let due: HashSet<JobId> = self
            .retry_at
            .iter()
            .filter(|(_, at)| **at <= now_instant)
            .map(|(id, _)| *id)
            .collect();
        for pick in select::admissions(&members, &queue, &self.revive, &due) {
            self.revive.remove(&pick.job_id);
            self.retry_at.remove(&pick.job_id);
            let controller = self.controller(pick.job_id).await?;
            let result = match pick.how {
                How::Start => controller.start().await,
                How::Retry => controller.retry().await,
                How::Resume => controller.resume().await,
            };
            match result {
                Ok(status) => tracing::debug!(
                    job_id = pick.job_id,
                    queue_id = self.queue_id,
                    %status,
                    "job admitted"
                ),
                // The controller reports the failure through the outcome channel.
                Err(e) => tracing::warn!(job_id = pick.job_id, error = %e, "admission failed"),
            }
        }

        let members = self.members().await?;
        if select::is_finished(&members, &self.revive, !self.retry_at.is_empty()) {
            if self.drain_outcomes().await {
                return Ok(Step::Wait(Some(Duration::ZERO)));
            }
            return Ok(Step::Finished);
        }
        let next_retry = self
            .retry_at
            .values()
            .filter(|at| **at > now_instant)
            .min()
            .map(|at| at.saturating_duration_since(Instant::now()));
        Ok(Step::Wait(earliest(boundary, next_retry)))
    }

    /// Handle outcomes that arrived while evaluating. True if any did.
    async fn drain_outcomes(&mut self) -> bool {
        let mut any = false;
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.on_outcome(outcome).await;
            any = true;
        }
        any
    }

    async fn on_outcome(&mut self, outcome: JobOutcome) {
        tracing::debug!(
            job_id = outcome.job_id,
            queue_id = self.queue_id,
            status = %outcome.status,
            "job settled"
        );
        if outcome.status != JobStatus::Error {
            return;
        }
        let Some(error) = outcome.error else {
            return;
        };
        let queue = match self.queue().await {
            Ok(Some(q)) => q,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(queue_id = self.queue_id, error = %e, "failed to load queue");
                return;
            }
        };
        let Ok(controller) = self.ctx.jobs.get(outcome.job_id).await else {
            return;
        };
        let job = controller.snapshot().await;
        if job.queue_id != Some(self.queue_id) {
            return;
        }
        if !(queue.retry_on_failure
            && error.kind.is_retryable()
            && job.retry_attempts < queue.retry_count)
        {
            tracing::info!(
                job_id = job.id,
                attempts = job.retry_attempts,
                kind = ?error.kind,
                "job failed, not retrying"
            );
            return;
        }
        let attempt = job.retry_attempts + 1;
        if let Err(e) = controller.update(|j| j.retry_attempts = attempt).await {
            tracing::warn!(job_id = job.id, error = %e, "failed to record retry attempt");
            return;
        }
        let delay = self.ctx.jobs.context().config.retry.backoff(attempt);
        self.retry_at.insert(job.id, Instant::now() + delay);
        tracing::info!(
            job_id = job.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
    }

    /// Manual start of a member. Started now if a slot is free.
    async fn admit(&mut self, job_id: JobId) -> CoreResult<JobStatus> {
        let controller = self.controller(job_id).await?;
        let job = controller.snapshot().await;
        if job.queue_id != Some(self.queue_id) {
            return Err(CoreError::Invalid(format!(
                "job {job_id} is not in queue {}",
                self.queue_id
            )));
        }
        let queue = self
            .queue()
            .await?
            .ok_or(CoreError::QueueNotFound(self.queue_id))?;
        let members = self.members().await?;
        if job.status.is_active() {
            return self.keep_or_defer(&controller, &queue, &members).await;
        }
        let holds_slot = queue.include_paused && job.status == JobStatus::Paused;
        let free = select::occupied(&members, queue.include_paused) < queue.concurrency.max(1) as usize;
        let open = window::is_open(&queue.schedule, self.ctx.clock.now());
        if open && (holds_slot || free) {
            self.revive.remove(&job_id);
            self.retry_at.remove(&job_id);
            return controller.start().await;
        }
        if matches!(
            job.status,
            JobStatus::Stopped | JobStatus::Error | JobStatus::Paused
        ) {
            self.revive.insert(job_id);
        }
        tracing::debug!(job_id, queue_id = self.queue_id, "no free slot, left for admission");
        Ok(job.status)
    }

    /// A member that was already running when it joined. It keeps going only
    /// while the queue stays within its ceiling and window; otherwise it is
    /// stopped and waits for a slot like any other revived member.
    async fn keep_or_defer(
        &mut self,
        controller: &JobController,
        queue: &Queue,
        members: &[Job],
    ) -> CoreResult<JobStatus> {
        let job_id = controller.id();
        let fits = select::occupied(members, queue.include_paused) <= queue.concurrency.max(1) as usize;
        if fits && window::is_open(&queue.schedule, self.ctx.clock.now()) {
            return Ok(controller.status().await);
        }
        tracing::info!(job_id, queue_id = self.queue_id, "no slot for running member, stopping it");
        let status = controller.stop().await?;
        if status == JobStatus::Stopped {
            self.revive.insert(job_id);
        }
        Ok(status)
    }

    async fn stop_members(&mut self) {
        let members = match self.members().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(queue_id = self.queue_id, error = %e, "failed to list members");
                return;
            }
        };
        for job in members.iter().filter(|j| j.status.is_active()) {
            match self.ctx.jobs.get(job.id).await {
                Ok(c) => {
                    if let Err(e) = c.stop().await {
                        tracing::warn!(job_id = job.id, error = %e, "failed to stop job");
                    }
                }
                Err(e) => tracing::warn!(job_id = job.id, error = %e, "failed to load job"),
            }
        }
    }

    async fn release_watchers(&self) {
        if let Ok(members) = self.members().await {
            for job in members {
                if let Ok(c) = self.ctx.jobs.get(job.id).await {
                    c.set_watcher(None);
                }
            }
        }
    }

    /// Mark the queue idle and publish `event`. `announce` adds a `Changed`
    /// notification for exits the facade did not ask for.
    async fn finish(&self, event: CoreEvent, announce: bool) {
        self.release_watchers().await;
        let ctx = self.ctx.jobs.context();
        match self.queue().await {
            Ok(Some(mut queue)) if queue.is_running => {
                queue.is_running = false;
                queue.touch();
                if let Err(e) = ctx.repo.update_queue(&queue).await {
                    tracing::warn!(queue_id = self.queue_id, error = %e, "failed to store queue");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(queue_id = self.queue_id, error = %e, "failed to load queue"),
        }
        ctx.events.emit(event);
        if announce {
            ctx.events.emit(CoreEvent::Changed(ChangeScope::Queue(self.queue_id)));
        }
    }
}
