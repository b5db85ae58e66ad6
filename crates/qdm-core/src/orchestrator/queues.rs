use std::sync::Arc;

use super::{NewQueue, Orchestrator, QueueUpdate};
use crate::error::{CoreError, CoreResult};
use crate::events::{ChangeScope, CoreEvent};
use crate::model::{Job, JobFilter, JobId, Queue, QueueId};
use crate::scheduler::QueueScheduler;

impl Orchestrator {
    pub async fn add_queue(&self, request: NewQueue) -> CoreResult<Queue> {
        let result = self.add_queue_inner(request).await;
        self.settle("add_queue", ChangeScope::Queues, result)
    }

    async fn add_queue_inner(&self, request: NewQueue) -> CoreResult<Queue> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(CoreError::Invalid("queue title is empty".into()));
        }
        if request.concurrency == 0 {
            return Err(CoreError::Invalid("queue concurrency must be at least 1".into()));
        }
        let mut queue = Queue::new(title);
        queue.concurrency = request.concurrency;
        queue.schedule = request.schedule;
        queue.retry_on_failure = request.retry_on_failure;
        queue.retry_count = request.retry_count;
        queue.include_paused = request.include_paused;
        let queue = self.repo().add_queue(queue).await?;
        tracing::info!(queue_id = queue.id, title = %queue.title, "queue added");
        Ok(queue)
    }

    /// Edit queue settings. A running queue picks them up immediately.
    pub async fn update_queue(&self, id: QueueId, update: QueueUpdate) -> CoreResult<Queue> {
        let result = self.update_queue_inner(id, update).await;
        self.settle("update_queue", ChangeScope::Queue(id), result)
    }

    async fn update_queue_inner(&self, id: QueueId, update: QueueUpdate) -> CoreResult<Queue> {
        if update.concurrency == Some(0) {
            return Err(CoreError::Invalid("queue concurrency must be at least 1".into()));
        }
        if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(CoreError::Invalid("queue title is empty".into()));
        }
        let mut queue = self.queue_inner(id).await?;
        update.apply(&mut queue);
        self.repo().update_queue(&queue).await?;
        self.nudge(id).await;
        Ok(queue)
    }

    /// Stop the queue, unassign its members and delete it. The default queue stays.
    pub async fn delete_queue(&self, id: QueueId) -> CoreResult<()> {
        let result = self.delete_queue_inner(id).await;
        self.settle("delete_queue", ChangeScope::Queues, result)
    }

    async fn delete_queue_inner(&self, id: QueueId) -> CoreResult<()> {
        let queue = self.queue_inner(id).await?;
        if queue.is_default {
            return Err(CoreError::Invalid(format!(
                "'{}' is the default queue and cannot be deleted",
                queue.title
            )));
        }
        self.stop_queue_inner(id).await?;
        for job in self.repo().list_jobs(&JobFilter::in_queue(id)).await? {
            self.jobs
                .get(job.id)
                .await?
                .update(|j| {
                    j.queue_id = None;
                    j.priority = 0;
                })
                .await?;
        }
        self.repo().delete_queue(id).await?;
        tracing::info!(queue_id = id, "queue deleted");
        Ok(())
    }

    pub async fn start_queue(&self, id: QueueId) -> CoreResult<Queue> {
        let result = self.start_queue_inner(id).await;
        self.settle("start_queue", ChangeScope::Queue(id), result)
    }

    async fn start_queue_inner(&self, id: QueueId) -> CoreResult<Queue> {
        if self.running(id).await.is_some() {
            return self.queue_inner(id).await;
        }
        let mut queue = self.queue_inner(id).await?;
        queue.is_running = true;
        queue.touch();
        self.repo().update_queue(&queue).await?;
        self.spawn_scheduler(id).await;
        Ok(queue)
    }

    pub(super) async fn spawn_scheduler(&self, id: QueueId) {
        let mut schedulers = self.schedulers.lock().await;
        if schedulers.get(&id).is_some_and(|s| !s.is_finished()) {
            return;
        }
        self.events().emit(CoreEvent::QueueStarted(id));
        schedulers.insert(id, QueueScheduler::spawn(Arc::clone(&self.scheduling), id));
        tracing::info!(queue_id = id, "queue started");
    }

    /// Stop every active member (they stay resumable) and mark the queue idle.
    pub async fn stop_queue(&self, id: QueueId) -> CoreResult<Queue> {
        let result: CoreResult<Queue> = async {
            self.stop_queue_inner(id).await?;
            self.queue_inner(id).await
        }
        .await;
        self.settle("stop_queue", ChangeScope::Queue(id), result)
    }

    async fn stop_queue_inner(&self, id: QueueId) -> CoreResult<()> {
        let queue = self.queue_inner(id).await?;
        let scheduler = self.schedulers.lock().await.remove(&id);
        match scheduler {
            Some(s) if !s.is_finished() => s.stop().await,
            _ if queue.is_running => {
                let mut queue = queue;
                queue.is_running = false;
                queue.touch();
                self.repo().update_queue(&queue).await?;
                self.events().emit(CoreEvent::QueueStopped(id));
                tracing::info!(queue_id = id, "queue marked stopped");
            }
            _ => {}
        }
        Ok(())
    }

    /// Append `job_id` to the end of `queue_id`, leaving its previous queue.
    /// A running job joining a running queue that is already full is stopped
    /// and waits for a slot.
    pub async fn add_to_queue(&self, job_id: JobId, queue_id: QueueId) -> CoreResult<Job> {
        let result = self.add_to_queue_inner(job_id, queue_id).await;
        self.settle("add_to_queue", ChangeScope::Jobs, result)
    }

    async fn add_to_queue_inner(&self, job_id: JobId, queue_id: QueueId) -> CoreResult<Job> {
        self.queue_inner(queue_id).await?;
        let controller = self.jobs.get(job_id).await?;
        let previous = controller.snapshot().await.queue_id;
        if previous == Some(queue_id) {
            return Ok(controller.snapshot().await);
        }
        let priority = self
            .repo()
            .list_jobs(&JobFilter::in_queue(queue_id))
            .await?
            .len() as u32;
        let job = controller
            .update(|j| {
                j.queue_id = Some(queue_id);
                j.priority = priority;
            })
            .await?;
        if let Some(old) = previous {
            controller.set_watcher(None);
            self.renumber(old).await?;
            self.nudge(old).await;
        }
        tracing::debug!(job_id, queue_id, priority, "job queued");
        if job.status.is_active() {
            if let Some(handle) = self.running(queue_id).await {
                if let Some(admitted) = handle.admit(job_id).await {
                    admitted?;
                }
                return Ok(controller.snapshot().await);
            }
        }
        self.nudge(queue_id).await;
        Ok(job)
    }

    /// Unassign `job_id` from its queue; the remaining members close ranks.
    pub async fn remove_from_queue(&self, job_id: JobId) -> CoreResult<Job> {
        let result = self.remove_from_queue_inner(job_id).await;
        self.settle("remove_from_queue", ChangeScope::Jobs, result)
    }

    async fn remove_from_queue_inner(&self, job_id: JobId) -> CoreResult<Job> {
        let controller = self.jobs.get(job_id).await?;
        let Some(queue_id) = controller.snapshot().await.queue_id else {
            return Ok(controller.snapshot().await);
        };
        let job = controller
            .update(|j| {
                j.queue_id = None;
                j.priority = 0;
            })
            .await?;
        controller.set_watcher(None);
        self.renumber(queue_id).await?;
        self.nudge(queue_id).await;
        tracing::debug!(job_id, queue_id, "job left queue");
        Ok(job)
    }

    /// Move a member to position `index` (clamped); the others keep their order.
    pub async fn move_in_queue(&self, job_id: JobId, index: usize) -> CoreResult<Vec<Job>> {
        let result = self.move_in_queue_inner(job_id, index).await;
        self.settle("move_in_queue", ChangeScope::Jobs, result)
    }

    async fn move_in_queue_inner(&self, job_id: JobId, index: usize) -> CoreResult<Vec<Job>> {
        let queue_id = self.member_queue(job_id).await?;
        let mut members = self.repo().list_jobs(&JobFilter::in_queue(queue_id)).await?;
        let from = members
            .iter()
            .position(|j| j.id == job_id)
            .ok_or(CoreError::JobNotFound(job_id))?;
        let job = members.remove(from);
        members.insert(index.min(members.len()), job);
        self.write_order(&members).await?;
        Ok(self.repo().list_jobs(&JobFilter::in_queue(queue_id)).await?)
    }

    /// Exchange the positions of two members of the same queue.
    pub async fn swap_in_queue(&self, a: JobId, b: JobId) -> CoreResult<Vec<Job>> {
        let result = self.swap_in_queue_inner(a, b).await;
        self.settle("swap_in_queue", ChangeScope::Jobs, result)
    }

    async fn swap_in_queue_inner(&self, a: JobId, b: JobId) -> CoreResult<Vec<Job>> {
        let queue_id = self.member_queue(a).await?;
        if self.member_queue(b).await? != queue_id {
            return Err(CoreError::Invalid(format!(
                "jobs {a} and {b} are not in the same queue"
            )));
        }
        let mut members = self.repo().list_jobs(&JobFilter::in_queue(queue_id)).await?;
        let pa = members.iter().position(|j| j.id == a).ok_or(CoreError::JobNotFound(a))?;
        let pb = members.iter().position(|j| j.id == b).ok_or(CoreError::JobNotFound(b))?;
        members.swap(pa, pb);
        self.write_order(&members).await?;
        Ok(self.repo().list_jobs(&JobFilter::in_queue(queue_id)).await?)
    }

    async fn member_queue(&self, job_id: JobId) -> CoreResult<QueueId> {
        self.jobs
            .get(job_id)
            .await?
            .snapshot()
            .await
            .queue_id
            .ok_or_else(|| CoreError::Invalid(format!("job {job_id} is not in a queue")))
    }
}
