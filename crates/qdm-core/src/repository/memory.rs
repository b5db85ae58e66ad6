use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::Repository;
use crate::model::{Job, JobFilter, JobId, Queue, QueueId};

#[derive(Default)]
struct Tables {
    jobs: BTreeMap<JobId, Job>,
    queues: BTreeMap<QueueId, Queue>,
    next_job_id: JobId,
    next_queue_id: QueueId,
}

/// In-process repository; nothing survives the process.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.tables.lock().await.jobs.get(&id).cloned())
    }

    async fn add_job(&self, mut job: Job) -> Result<Job> {
        let mut t = self.tables.lock().await;
        t.next_job_id += 1;
        job.id = t.next_job_id;
        t.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let mut t = self.tables.lock().await;
        match t.jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => anyhow::bail!("job {} not stored", job.id),
        }
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        self.tables.lock().await.jobs.remove(&id);
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let t = self.tables.lock().await;
        let mut out: Vec<Job> = t.jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        out.sort_by_key(|j| (j.priority, j.id));
        Ok(out)
    }

    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>> {
        Ok(self.tables.lock().await.queues.get(&id).cloned())
    }

    async fn add_queue(&self, mut queue: Queue) -> Result<Queue> {
        let mut t = self.tables.lock().await;
        t.next_queue_id += 1;
        queue.id = t.next_queue_id;
        t.queues.insert(queue.id, queue.clone());
        Ok(queue)
    }

    async fn update_queue(&self, queue: &Queue) -> Result<()> {
        let mut t = self.tables.lock().await;
        match t.queues.get_mut(&queue.id) {
            Some(slot) => {
                *slot = queue.clone();
                Ok(())
            }
            None => anyhow::bail!("queue {} not stored", queue.id),
        }
    }

    async fn delete_queue(&self, id: QueueId) -> Result<()> {
        self.tables.lock().await.queues.remove(&id);
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<Queue>> {
        Ok(self.tables.lock().await.queues.values().cloned().collect())
    }
}
