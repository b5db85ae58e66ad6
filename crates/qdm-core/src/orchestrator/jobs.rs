use std::collections::HashSet;

use url::Url;

use super::{NewJob, Orchestrator};
use crate::error::{CoreError, CoreResult};
use crate::events::ChangeScope;
use crate::job::DuplicateAction;
use crate::model::{Job, JobFilter, JobId, JobStatus};
use crate::url_model::{derive_filename, sanitize_filename, unique_filename_among};

impl Orchestrator {
    /// Create a job, resolving duplicates first. With `start` the job is
    /// started right away (through its queue when that queue is running).
    pub async fn add_job(&self, request: NewJob, start: bool) -> CoreResult<Job> {
        let result = self.add_job_inner(request, start).await;
        let scope = match &result {
            Ok(job) => ChangeScope::Job(job.id),
            Err(_) => ChangeScope::Jobs,
        };
        self.settle("add_job", scope, result)
    }

    async fn add_job_inner(&self, request: NewJob, start: bool) -> CoreResult<Job> {
        let url = request.url.trim().to_string();
        let parsed = Url::parse(&url).map_err(|e| CoreError::Invalid(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https" | "ftp") {
            return Err(CoreError::Invalid(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        let queue = match request.queue_id {
            Some(id) => Some(self.queue_inner(id).await?),
            None => None,
        };

        let existing = self
            .repo()
            .list_jobs(&JobFilter::with_url(url.clone()))
            .await?
            .into_iter()
            .next();
        if let Some(existing) = existing {
            match self.duplicates.resolve(&url, &existing).await {
                None => {
                    return Err(CoreError::DuplicateConflict {
                        url,
                        existing: existing.id,
                    })
                }
                Some(DuplicateAction::ResumeExisting) => {
                    tracing::info!(job_id = existing.id, "duplicate url, keeping existing job");
                    if start {
                        self.start_or_log(existing.id).await;
                    }
                    return Ok(self.jobs.get(existing.id).await?.snapshot().await);
                }
                Some(DuplicateAction::Overwrite) => {
                    tracing::info!(job_id = existing.id, "duplicate url, replacing existing job");
                    self.remove_job_inner(existing.id, true).await?;
                }
                Some(DuplicateAction::KeepBoth) => {
                    tracing::debug!(job_id = existing.id, "duplicate url, keeping both");
                }
            }
        }

        let config = self.config();
        let file_name = request
            .file_name
            .as_deref()
            .map(sanitize_filename)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| derive_filename(&url, None));
        let category = match request.category.as_deref() {
            Some(name) => Some(
                config
                    .category_by_name(name)
                    .ok_or_else(|| CoreError::Invalid(format!("unknown category '{name}'")))?,
            ),
            None => config.category_for(&file_name),
        };
        let save_dir = request
            .save_dir
            .clone()
            .or_else(|| category.map(|c| config.category_dir(c)))
            .unwrap_or_else(|| config.resolved_download_dir());
        tokio::fs::create_dir_all(&save_dir).await.map_err(|e| {
            CoreError::Scheduling(format!(
                "cannot create save directory {}: {e}",
                save_dir.display()
            ))
        })?;

        let taken: HashSet<String> = self
            .repo()
            .list_jobs(&JobFilter::all())
            .await?
            .into_iter()
            .filter(|j| j.save_dir == save_dir)
            .map(|j| j.file_name)
            .collect();
        let file_name =
            unique_filename_among(&file_name, |n| taken.contains(n) || save_dir.join(n).exists());

        let mut job = Job::new(url, file_name, save_dir);
        job.category = category.map(|c| c.name.clone());
        job.expected_sha256 = request
            .expected_sha256
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty());
        job.speed_limit = request.speed_limit.filter(|l| *l > 0);
        if let Some(queue) = &queue {
            let members = self.repo().list_jobs(&JobFilter::in_queue(queue.id)).await?;
            job.queue_id = Some(queue.id);
            job.priority = members.len() as u32;
        }
        let job = self.repo().add_job(job).await?;
        self.jobs.insert(job.clone());
        tracing::info!(
            job_id = job.id,
            url = %job.url,
            file = %job.file_name,
            queue_id = ?job.queue_id,
            "job added"
        );

        if start {
            self.start_or_log(job.id).await;
        } else if let Some(queue_id) = job.queue_id {
            self.nudge(queue_id).await;
        }
        Ok(self.jobs.get(job.id).await?.snapshot().await)
    }

    /// Start failures leave the job in `Error` with its message; the add
    /// itself still succeeded.
    async fn start_or_log(&self, id: JobId) {
        if let Err(e) = self.start_job_inner(id).await {
            tracing::warn!(job_id = id, error = %e, "job added but did not start");
        }
    }

    /// Cancel the job, forget it and close the gap in its queue.
    pub async fn remove_job(&self, id: JobId, delete_files: bool) -> CoreResult<()> {
        let result = self.remove_job_inner(id, delete_files).await;
        self.settle("remove_job", ChangeScope::Job(id), result)
    }

    pub(super) async fn remove_job_inner(&self, id: JobId, delete_files: bool) -> CoreResult<()> {
        let controller = self.jobs.get(id).await?;
        controller.set_watcher(None);
        controller.cancel(delete_files).await?;
        let job = controller.snapshot().await;
        self.repo().delete_job(id).await?;
        self.jobs.remove(id);
        tracing::info!(job_id = id, delete_files, "job removed");
        if let Some(queue_id) = job.queue_id {
            self.renumber(queue_id).await?;
            self.nudge(queue_id).await;
        }
        Ok(())
    }

    /// Start a job. Members of a running queue wait for a free slot.
    pub async fn start_job(&self, id: JobId) -> CoreResult<JobStatus> {
        let result = self.start_job_inner(id).await;
        self.settle("start_job", ChangeScope::Job(id), result)
    }

    async fn start_job_inner(&self, id: JobId) -> CoreResult<JobStatus> {
        let controller = self.jobs.get(id).await?;
        if let Some(status) = self.admit_through_queue(id).await {
            return status;
        }
        controller.start().await
    }

    /// Route a manual start through the job's running queue, if any.
    async fn admit_through_queue(&self, id: JobId) -> Option<CoreResult<JobStatus>> {
        let job = self.jobs.get(id).await.ok()?.snapshot().await;
        let handle = self.running(job.queue_id?).await?;
        handle.admit(id).await
    }

    pub async fn pause_job(&self, id: JobId) -> CoreResult<JobStatus> {
        let result: CoreResult<JobStatus> = async { self.jobs.get(id).await?.pause().await }.await;
        self.settle("pause_job", ChangeScope::Job(id), result)
    }

    pub async fn resume_job(&self, id: JobId) -> CoreResult<JobStatus> {
        let result: CoreResult<JobStatus> = async {
            let controller = self.jobs.get(id).await?;
            if controller.status().await != JobStatus::Paused {
                return controller.resume().await;
            }
            match self.admit_through_queue(id).await {
                Some(status) => status,
                None => controller.resume().await,
            }
        }
        .await;
        self.settle("resume_job", ChangeScope::Job(id), result)
    }

    pub async fn stop_job(&self, id: JobId) -> CoreResult<JobStatus> {
        let result: CoreResult<JobStatus> = async { self.jobs.get(id).await?.stop().await }.await;
        self.settle("stop_job", ChangeScope::Job(id), result)
    }

    /// Manual retry of a failed job. Resumes when the data is intact.
    pub async fn retry_job(&self, id: JobId) -> CoreResult<JobStatus> {
        let result: CoreResult<JobStatus> = async {
            let controller = self.jobs.get(id).await?;
            if controller.status().await != JobStatus::Error {
                return controller.retry().await;
            }
            match self.admit_through_queue(id).await {
                Some(status) => status,
                None => controller.retry().await,
            }
        }
        .await;
        self.settle("retry_job", ChangeScope::Job(id), result)
    }

    /// Bytes per second for this job; `None` falls back to the configured default.
    pub async fn set_job_speed_limit(&self, id: JobId, limit: Option<u64>) -> CoreResult<()> {
        let result: CoreResult<()> = async { self.jobs.get(id).await?.set_speed_limit(limit).await }.await;
        self.settle("set_job_speed_limit", ChangeScope::Job(id), result)
    }
}
