//! Orchestration facade: the one entry point front ends talk to.
//!
//! Every mutation is logged on failure, returned as a `CoreError` and
//! followed by exactly one `CoreEvent::Changed`.

mod jobs;
mod queues;
mod types;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::config::{self, QdmConfig};
use crate::error::{CoreError, CoreResult};
use crate::events::{ChangeScope, CoreEvent, EventBus};
use crate::job::{DuplicateStrategy, FixedDuplicatePolicy, JobContext, JobRegistry};
use crate::model::{Job, JobFilter, JobId, JobStatus, Queue, QueueId};
use crate::repository::{Repository, SqliteRepository};
use crate::scheduler::{QueueScheduler, SchedulerContext, SchedulerHandle};

pub use types::{NewJob, NewQueue, QueueUpdate};

pub struct Orchestrator {
    jobs: JobRegistry,
    scheduling: Arc<SchedulerContext>,
    schedulers: Mutex<HashMap<QueueId, QueueScheduler>>,
    duplicates: Arc<dyn DuplicateStrategy>,
}

impl Orchestrator {
    pub fn new(repo: Arc<dyn Repository>, config: QdmConfig) -> Self {
        let duplicates = Arc::new(FixedDuplicatePolicy(Some(config.duplicate_action)));
        let ctx = Arc::new(JobContext::new(repo, Arc::new(config), EventBus::new()));
        let jobs = JobRegistry::new(ctx);
        Orchestrator {
            scheduling: Arc::new(SchedulerContext {
                jobs: jobs.clone(),
                clock: Arc::new(SystemClock),
            }),
            jobs,
            schedulers: Mutex::new(HashMap::new()),
            duplicates,
        }
    }

    /// Configuration file and SQLite database from the XDG directories.
    pub async fn open_default() -> anyhow::Result<Self> {
        let config = config::load_or_init()?;
        let repo = SqliteRepository::open_default().await?;
        Ok(Self::new(Arc::new(repo), config))
    }

    /// Replace the wall clock used for schedule windows. Takes effect for
    /// queues started afterwards.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.scheduling = Arc::new(SchedulerContext {
            jobs: self.jobs.clone(),
            clock,
        });
        self
    }

    pub fn with_duplicate_strategy(mut self, strategy: Arc<dyn DuplicateStrategy>) -> Self {
        self.duplicates = strategy;
        self
    }

    fn repo(&self) -> &Arc<dyn Repository> {
        &self.jobs.context().repo
    }

    fn events(&self) -> &EventBus {
        &self.jobs.context().events
    }

    pub fn config(&self) -> &QdmConfig {
        &self.jobs.context().config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events().subscribe()
    }

    /// Log a failed operation and announce the change.
    fn settle<T>(&self, op: &'static str, scope: ChangeScope, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e) = &result {
            tracing::warn!(op, error = %e, "operation failed");
        }
        self.events().emit(CoreEvent::Changed(scope));
        result
    }

    fn logged<T>(op: &'static str, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e) = &result {
            tracing::warn!(op, error = %e, "operation failed");
        }
        result
    }

    /// Live actor for `queue_id`, dropping it if it already exited.
    async fn running(&self, queue_id: QueueId) -> Option<SchedulerHandle> {
        let mut schedulers = self.schedulers.lock().await;
        match schedulers.get(&queue_id) {
            Some(s) if s.is_finished() => {
                schedulers.remove(&queue_id);
                None
            }
            Some(s) => Some(s.handle()),
            None => None,
        }
    }

    async fn nudge(&self, queue_id: QueueId) {
        if let Some(handle) = self.running(queue_id).await {
            handle.nudge();
        }
    }

    /// Reconcile stored state after a restart: transfers that were running
    /// become `Stopped`, priorities are renumbered, the default queue exists
    /// and queues that were running are started again.
    pub async fn load(&self) -> CoreResult<()> {
        let result = self.load_inner().await;
        self.settle("load", ChangeScope::All, result)
    }

    async fn load_inner(&self) -> CoreResult<()> {
        let repo = self.repo();
        for mut job in repo.list_jobs(&JobFilter::all()).await? {
            if self.jobs.contains(job.id) {
                continue;
            }
            if matches!(
                job.status,
                JobStatus::Downloading | JobStatus::Merging | JobStatus::Stopping
            ) {
                tracing::info!(job_id = job.id, status = %job.status, "interrupted job marked stopped");
                job.status = JobStatus::Stopped;
                job.touch();
                repo.update_job(&job).await?;
            }
            self.jobs.insert(job);
        }

        let mut queues = repo.list_queues().await?;
        if !queues.iter().any(|q| q.is_default) {
            let mut queue = Queue::new(self.config().default_queue_title.clone());
            queue.is_default = true;
            let queue = repo.add_queue(queue).await?;
            tracing::info!(queue_id = queue.id, "created default queue");
            queues.push(queue);
        }
        for queue in &queues {
            self.renumber(queue.id).await?;
        }
        for queue in queues.iter().filter(|q| q.is_running) {
            self.spawn_scheduler(queue.id).await;
        }
        tracing::info!(queues = queues.len(), "state loaded");
        Ok(())
    }

    /// Ask every running queue to re-evaluate and wait for the passes.
    pub async fn reevaluate(&self) {
        let handles: Vec<SchedulerHandle> = {
            let mut schedulers = self.schedulers.lock().await;
            schedulers.retain(|_, s| !s.is_finished());
            schedulers.values().map(QueueScheduler::handle).collect()
        };
        for handle in handles {
            handle.reevaluate().await;
        }
    }

    /// Stop every running queue and transfer, leaving jobs resumable.
    pub async fn shutdown(&self) {
        let schedulers: Vec<QueueScheduler> = self.schedulers.lock().await.drain().map(|(_, s)| s).collect();
        for scheduler in schedulers {
            scheduler.stop().await;
        }
        for controller in self.jobs.all() {
            if let Err(e) = controller.stop().await {
                tracing::warn!(job_id = controller.id(), error = %e, "failed to stop job");
            }
        }
    }

    pub async fn job(&self, id: JobId) -> CoreResult<Job> {
        let controller = Self::logged("job", self.jobs.get(id).await)?;
        Ok(controller.snapshot().await)
    }

    pub async fn jobs(&self, filter: &JobFilter) -> CoreResult<Vec<Job>> {
        let jobs = self.repo().list_jobs(filter).await.map_err(CoreError::Persistence);
        Self::logged("jobs", jobs)
    }

    pub async fn queue(&self, id: QueueId) -> CoreResult<Queue> {
        Self::logged("queue", self.queue_inner(id).await)
    }

    pub async fn queues(&self) -> CoreResult<Vec<Queue>> {
        let queues = self.repo().list_queues().await.map_err(CoreError::Persistence);
        Self::logged("queues", queues)
    }

    /// The system queue that cannot be deleted.
    pub async fn default_queue(&self) -> CoreResult<Queue> {
        let queues = self.queues().await?;
        queues
            .into_iter()
            .find(|q| q.is_default)
            .ok_or_else(|| CoreError::Invalid("no default queue; call load first".into()))
    }

    /// Members of `queue_id` in priority order.
    pub async fn queue_members(&self, queue_id: QueueId) -> CoreResult<Vec<Job>> {
        let result: CoreResult<Vec<Job>> = async {
            self.queue_inner(queue_id).await?;
            Ok(self.repo().list_jobs(&JobFilter::in_queue(queue_id)).await?)
        }
        .await;
        Self::logged("queue_members", result)
    }

    async fn queue_inner(&self, id: QueueId) -> CoreResult<Queue> {
        self.repo()
            .get_queue(id)
            .await?
            .ok_or(CoreError::QueueNotFound(id))
    }

    /// Rewrite member priorities to `0..n` in their current order.
    async fn renumber(&self, queue_id: QueueId) -> CoreResult<()> {
        let members = self.repo().list_jobs(&JobFilter::in_queue(queue_id)).await?;
        self.write_order(&members).await
    }

    /// Store `ordered` as the new priority order.
    async fn write_order(&self, ordered: &[Job]) -> CoreResult<()> {
        for (index, job) in ordered.iter().enumerate() {
            let priority = index as u32;
            if job.priority != priority {
                self.jobs
                    .get(job.id)
                    .await?
                    .update(|j| j.priority = priority)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
