use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{mpsc, watch, Mutex};

use super::{transition, JobContext, JobOutcome};
use crate::error::{CoreError, CoreResult};
use crate::events::CoreEvent;
use crate::fetch_head::RemoteInfo;
use crate::model::{Job, JobError, JobFilter, JobId, JobStatus};
use crate::segmenter::{chunk_count, plan_chunks, Chunk};
use crate::storage::{remove_chunk_files, temp_path};
use crate::throttle::{Limiters, TokenBucket};
use crate::transfer::{self, check_resume, Signal, TransferControl, TransferPlan};
use crate::url_model::{derive_filename, unique_filename_among};
use std::time::Duration;

#[derive(Clone)]
pub(super) struct Live {
    pub(super) generation: u64,
    pub(super) control: TransferControl,
    pub(super) done: watch::Receiver<bool>,
}

pub(super) struct Inner {
    pub(super) id: JobId,
    pub(super) ctx: Arc<JobContext>,
    pub(super) job: Mutex<Job>,
    /// Serializes start/pause/resume/stop/retry/cancel/reset.
    op_lock: Mutex<()>,
    pub(super) live: StdMutex<Option<Live>>,
    generation: StdMutex<u64>,
    watcher: StdMutex<Option<mpsc::UnboundedSender<JobOutcome>>>,
    pub(super) limiter: Arc<TokenBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Launch {
    /// Continue if the chunk data is intact, otherwise start over.
    Start,
    /// Continue or fail with `ResumeUnsupported`.
    Resume,
}

/// Handle to one job. Cheap to clone; all clones drive the same job.
#[derive(Clone)]
pub struct JobController {
    pub(super) inner: Arc<Inner>,
}

async fn wait_done(mut done: watch::Receiver<bool>) {
    let _ = done.wait_for(|d| *d).await;
}

impl JobController {
    pub fn new(ctx: Arc<JobContext>, job: Job) -> Self {
        let limiter = TokenBucket::shared(job.speed_limit.or(ctx.config.job_bytes_per_sec));
        JobController {
            inner: Arc::new(Inner {
                id: job.id,
                ctx,
                job: Mutex::new(job),
                op_lock: Mutex::new(()),
                live: StdMutex::new(None),
                generation: StdMutex::new(0),
                watcher: StdMutex::new(None),
                limiter,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub async fn snapshot(&self) -> Job {
        self.inner.job.lock().await.clone()
    }

    pub async fn status(&self) -> JobStatus {
        self.inner.job.lock().await.status
    }

    /// Route settle notifications to a scheduler (or nowhere).
    pub fn set_watcher(&self, watcher: Option<mpsc::UnboundedSender<JobOutcome>>) {
        *self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = watcher;
    }

    pub(super) fn notify(&self, job: &Job) {
        let watcher = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(tx) = watcher {
            let _ = tx.send(JobOutcome {
                job_id: job.id,
                status: job.status,
                error: job.last_error.clone(),
            });
        }
    }

    pub(super) fn live(&self) -> Option<Live> {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(super) async fn persist(&self, job: &Job) -> CoreResult<()> {
        self.inner
            .ctx
            .repo
            .update_job(job)
            .await
            .map_err(CoreError::Persistence)
    }

    /// Transition, persist and publish. `job` is left untouched when the
    /// record cannot be stored.
    pub(super) async fn commit(&self, job: &mut Job, to: JobStatus) -> CoreResult<()> {
        let mut next = job.clone();
        transition(&mut next, to)?;
        self.persist(&next).await?;
        *job = next;
        tracing::debug!(job_id = job.id, status = %to, "job status");
        self.inner.ctx.events.emit(CoreEvent::JobStatusChanged {
            job_id: job.id,
            status: to,
        });
        Ok(())
    }

    /// Record `err`, move to `Error`, publish and notify. Returns `err`.
    pub(super) async fn fail<T>(&self, err: CoreError) -> CoreResult<T> {
        let mut job = self.inner.job.lock().await;
        let recorded = JobError::from(&err);
        tracing::warn!(job_id = job.id, error = %recorded.message, "job failed");
        job.last_error = Some(recorded.clone());
        if let Err(e) = self.commit(&mut job, JobStatus::Error).await {
            tracing::warn!(job_id = job.id, error = %e, "failed to record job error");
        }
        self.inner.ctx.events.emit(CoreEvent::DownloadFailed {
            job_id: job.id,
            error: recorded,
        });
        self.notify(&job);
        Err(err)
    }

    /// Start (or restart) the download. Paused jobs resume; finished ones are refused.
    pub async fn start(&self) -> CoreResult<JobStatus> {
        let _op = self.inner.op_lock.lock().await;
        let status = self.status().await;
        match status {
            JobStatus::Downloading | JobStatus::Merging | JobStatus::Stopping => Ok(status),
            JobStatus::Paused => self.launch(Launch::Resume).await,
            JobStatus::Completed => Err(CoreError::InvalidTransition {
                job_id: self.id(),
                from: status,
                to: JobStatus::Downloading,
            }),
            JobStatus::Idle | JobStatus::Stopped | JobStatus::Error => {
                if status != JobStatus::Idle {
                    let mut job = self.inner.job.lock().await;
                    self.commit(&mut job, JobStatus::Idle).await?;
                }
                self.launch(Launch::Start).await
            }
        }
    }

    /// Pause a running download. No-op when already paused.
    pub async fn pause(&self) -> CoreResult<JobStatus> {
        let _op = self.inner.op_lock.lock().await;
        let status = self.status().await;
        match status {
            JobStatus::Paused => Ok(status),
            JobStatus::Downloading => {
                match self.live() {
                    Some(live) => {
                        live.control.request(Signal::Pause);
                        wait_done(live.done).await;
                    }
                    None => {
                        let mut job = self.inner.job.lock().await;
                        self.commit(&mut job, JobStatus::Paused).await?;
                        self.notify(&job);
                    }
                }
                tracing::info!(job_id = self.id(), "job paused");
                Ok(self.status().await)
            }
            other => Err(CoreError::InvalidTransition {
                job_id: self.id(),
                from: other,
                to: JobStatus::Paused,
            }),
        }
    }

    /// Continue a paused download from its recorded offsets. Fails into
    /// `Error` with `ResumeUnsupported` when the source or chunk files changed.
    pub async fn resume(&self) -> CoreResult<JobStatus> {
        let _op = self.inner.op_lock.lock().await;
        match self.status().await {
            JobStatus::Paused => self.launch(Launch::Resume).await,
            JobStatus::Downloading => Ok(JobStatus::Downloading),
            other => Err(CoreError::InvalidTransition {
                job_id: self.id(),
                from: other,
                to: JobStatus::Downloading,
            }),
        }
    }

    /// Stop and wait until the transfer has flushed. No-op when not running.
    pub async fn stop(&self) -> CoreResult<JobStatus> {
        let _op = self.inner.op_lock.lock().await;
        self.wind_down(Signal::Stop).await?;
        tracing::info!(job_id = self.id(), "job stopped");
        Ok(self.status().await)
    }

    /// Shared by stop and cancel: end any transfer and land in `Stopped`
    /// (or wherever a merge in progress ends up).
    async fn wind_down(&self, signal: Signal) -> CoreResult<()> {
        let status = self.status().await;
        match status {
            JobStatus::Downloading => {
                {
                    let mut job = self.inner.job.lock().await;
                    self.commit(&mut job, JobStatus::Stopping).await?;
                }
                match self.live() {
                    Some(live) => {
                        live.control.request(signal);
                        wait_done(live.done).await;
                    }
                    None => self.settle_stopped().await?,
                }
            }
            JobStatus::Paused => {
                {
                    let mut job = self.inner.job.lock().await;
                    self.commit(&mut job, JobStatus::Stopping).await?;
                }
                self.settle_stopped().await?;
            }
            JobStatus::Merging | JobStatus::Stopping => {
                if let Some(live) = self.live() {
                    // A merge has no way back to Stopped; only cancel abandons it.
                    if status == JobStatus::Merging && signal == Signal::Cancel {
                        live.control.request(signal);
                    }
                    wait_done(live.done).await;
                }
            }
            JobStatus::Idle | JobStatus::Stopped | JobStatus::Completed | JobStatus::Error => {}
        }
        Ok(())
    }

    async fn settle_stopped(&self) -> CoreResult<()> {
        let mut job = self.inner.job.lock().await;
        self.commit(&mut job, JobStatus::Stopped).await?;
        self.inner
            .ctx
            .events
            .emit(CoreEvent::DownloadStopped(job.id));
        self.notify(&job);
        Ok(())
    }

    /// Try again after a failure: resume when the data is intact, otherwise restart.
    pub async fn retry(&self) -> CoreResult<JobStatus> {
        let _op = self.inner.op_lock.lock().await;
        match self.status().await {
            JobStatus::Error => self.launch(Launch::Start).await,
            JobStatus::Downloading => Ok(JobStatus::Downloading),
            other => Err(CoreError::InvalidTransition {
                job_id: self.id(),
                from: other,
                to: JobStatus::Downloading,
            }),
        }
    }

    /// Stop any transfer and forget its chunk state. With `delete_files` the
    /// chunk files, the `.part` file and (for a completed job) the final file go too.
    pub async fn cancel(&self, delete_files: bool) -> CoreResult<JobStatus> {
        let _op = self.inner.op_lock.lock().await;
        self.wind_down(Signal::Cancel).await?;
        let mut job = self.inner.job.lock().await;
        let final_path = job.final_path();
        if delete_files {
            remove_chunk_files(&final_path, job.chunks.len().max(1));
            let _ = tokio::fs::remove_file(temp_path(&final_path)).await;
            if job.status == JobStatus::Completed {
                if let Err(e) = tokio::fs::remove_file(&final_path).await {
                    tracing::warn!(job_id = job.id, error = %e, "failed to delete downloaded file");
                }
            }
        }
        if job.status != JobStatus::Completed {
            job.clear_progress();
            job.touch();
            self.persist(&job).await?;
        }
        tracing::info!(job_id = job.id, delete_files, "job cancelled");
        Ok(job.status)
    }

    /// Force a failed or stopped job back to `Idle`.
    pub async fn reset(&self) -> CoreResult<JobStatus> {
        let _op = self.inner.op_lock.lock().await;
        let mut job = self.inner.job.lock().await;
        match job.status {
            JobStatus::Idle => Ok(JobStatus::Idle),
            JobStatus::Error | JobStatus::Stopped => {
                job.last_error = None;
                job.retry_attempts = 0;
                self.commit(&mut job, JobStatus::Idle).await?;
                Ok(JobStatus::Idle)
            }
            other => Err(CoreError::InvalidTransition {
                job_id: job.id,
                from: other,
                to: JobStatus::Idle,
            }),
        }
    }

    /// Change the per-job cap; applies to a running transfer immediately.
    pub async fn set_speed_limit(&self, limit: Option<u64>) -> CoreResult<()> {
        let mut job = self.inner.job.lock().await;
        job.speed_limit = limit.filter(|l| *l > 0);
        job.touch();
        self.inner
            .limiter
            .set_rate(job.speed_limit.or(self.inner.ctx.config.job_bytes_per_sec));
        self.persist(&job).await
    }

    /// Mutate non-status fields (queue membership, priority, retry count,
    /// checksum) and persist. Status and id cannot be changed this way.
    pub async fn update<F>(&self, f: F) -> CoreResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut job = self.inner.job.lock().await;
        let (id, status) = (job.id, job.status);
        f(&mut job);
        job.id = id;
        job.status = status;
        job.touch();
        self.persist(&job).await?;
        Ok(job.clone())
    }

    async fn launch(&self, mode: Launch) -> CoreResult<JobStatus> {
        let (url, save_dir) = {
            let mut job = self.inner.job.lock().await;
            job.last_error = None;
            self.commit(&mut job, JobStatus::Downloading).await?;
            (job.url.clone(), job.save_dir.clone())
        };
        let plan = match self.prepare(mode, &url, &save_dir).await {
            Ok(plan) => plan,
            Err(e) => return self.fail(e).await,
        };
        tracing::info!(
            job_id = self.id(),
            chunks = plan.chunks.len(),
            ranged = plan.ranged,
            "job downloading"
        );
        self.spawn_transfer(plan);
        Ok(JobStatus::Downloading)
    }

    async fn prepare(
        &self,
        mode: Launch,
        url: &str,
        save_dir: &std::path::Path,
    ) -> CoreResult<TransferPlan> {
        tokio::fs::create_dir_all(save_dir).await.map_err(|e| {
            CoreError::Scheduling(format!(
                "cannot create save directory {}: {}",
                save_dir.display(),
                e
            ))
        })?;
        let config = &self.inner.ctx.config;
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let remote = transfer::probe(url, connect_timeout).await?;

        let mut job = self.inner.job.lock().await;
        let chunks = match check_resume(&job, &remote) {
            Ok(chunks) if !chunks.is_empty() => {
                tracing::debug!(job_id = job.id, "continuing from recorded offsets");
                chunks
            }
            Ok(_) => {
                self.adopt_server_name(&mut job, &remote).await;
                fresh_plan(&mut job, &remote, config)
            }
            Err(e) if mode == Launch::Resume => return Err(e),
            Err(e) => {
                tracing::warn!(job_id = job.id, reason = %e, "cannot continue, restarting from zero");
                remove_chunk_files(&job.final_path(), job.chunks.len());
                job.clear_progress();
                fresh_plan(&mut job, &remote, config)
            }
        };
        job.chunks = chunks.clone();
        job.bytes_transferred = chunks.iter().map(|c| c.received).sum();
        job.touch();
        self.persist(&job).await?;

        Ok(TransferPlan {
            job_id: job.id,
            url: job.url.clone(),
            final_path: job.final_path(),
            chunks,
            ranged: job.resumable,
            limiters: Limiters::new(vec![
                Arc::clone(&self.inner.limiter),
                Arc::clone(&self.inner.ctx.global_limiter),
            ]),
            retry: config.retry,
            connect_timeout,
            progress_interval: Duration::from_millis(config.progress_interval_ms.max(10)),
        })
    }

    /// Before the first byte lands, a `Content-Disposition` name replaces one
    /// that was only derived from the URL. Names the user chose are kept.
    async fn adopt_server_name(&self, job: &mut Job, remote: &RemoteInfo) {
        let Some(header) = remote.content_disposition.as_deref() else {
            return;
        };
        if job.file_name != derive_filename(&job.url, None) {
            return;
        }
        let offered = derive_filename(&job.url, Some(header));
        if offered == job.file_name {
            return;
        }
        let taken: HashSet<String> = match self.inner.ctx.repo.list_jobs(&JobFilter::all()).await {
            Ok(jobs) => jobs
                .into_iter()
                .filter(|j| j.id != job.id && j.save_dir == job.save_dir)
                .map(|j| j.file_name)
                .collect(),
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "cannot check file names, keeping url name");
                return;
            }
        };
        let name = unique_filename_among(&offered, |n| {
            taken.contains(n) || job.save_dir.join(n).exists()
        });
        tracing::info!(job_id = job.id, from = %job.file_name, to = %name, "using server file name");
        job.file_name = name;
    }

    fn spawn_transfer(&self, plan: TransferPlan) {
        let transfer = transfer::start(plan);
        let (done_tx, done_rx) = watch::channel(false);
        let generation = {
            let mut g = self
                .inner
                .generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *g += 1;
            *g
        };
        *self.inner.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(Live {
            generation,
            control: transfer.control().clone(),
            done: done_rx,
        });
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(transfer, generation).await;
            let _ = done_tx.send(true);
        });
    }
}

/// First-time chunk layout from the probe result. Records the validators.
fn fresh_plan(
    job: &mut Job,
    remote: &RemoteInfo,
    config: &crate::config::QdmConfig,
) -> Vec<Chunk> {
    job.total_size = remote.content_length;
    job.resumable = remote.accept_ranges && remote.content_length.is_some();
    job.etag = remote.etag.clone();
    job.last_modified = remote.last_modified.clone();
    let n = chunk_count(
        remote.content_length,
        job.resumable,
        config.max_chunks,
        config.min_chunk_bytes,
    );
    plan_chunks(remote.content_length, n)
}
