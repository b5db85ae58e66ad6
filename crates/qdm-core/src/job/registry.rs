//! Live controllers, one per job, loaded from the repository on first use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{JobContext, JobController};
use crate::error::{CoreError, CoreResult};
use crate::model::{Job, JobId};

#[derive(Clone)]
pub struct JobRegistry {
    ctx: Arc<JobContext>,
    map: Arc<Mutex<HashMap<JobId, JobController>>>,
}

impl JobRegistry {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self {
            ctx,
            map: Arc::default(),
        }
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    fn cached(&self, id: JobId) -> Option<JobController> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Controller for `id`, loading the record if it is not cached yet.
    pub async fn get(&self, id: JobId) -> CoreResult<JobController> {
        if let Some(c) = self.cached(id) {
            return Ok(c);
        }
        let job = self
            .ctx
            .repo
            .get_job(id)
            .await
            .map_err(CoreError::Persistence)?
            .ok_or(CoreError::JobNotFound(id))?;
        Ok(self.insert(job))
    }

    /// Register a stored job. An existing controller for the id wins.
    pub fn insert(&self, job: Job) -> JobController {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(job.id)
            .or_insert_with(|| JobController::new(Arc::clone(&self.ctx), job))
            .clone()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.cached(id).is_some()
    }

    pub fn remove(&self, id: JobId) -> Option<JobController> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn all(&self) -> Vec<JobController> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
