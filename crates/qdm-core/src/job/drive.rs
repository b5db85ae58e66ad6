//! The task that follows a running transfer and settles the job when it ends.

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use super::controller::JobController;
use crate::checksum::verify_sha256;
use crate::error::{CoreError, CoreResult};
use crate::events::CoreEvent;
use crate::model::{Job, JobError, JobStatus};
use crate::progress::{ProgressStats, ProgressTicker};
use crate::segmenter::Chunk;
use crate::throttle::Limiters;
use crate::transfer::{self, Signal, Transfer, TransferEvent, TransferOutcome};

/// Progress is stored at most this often; chunk closes are always stored.
const PERSIST_INTERVAL: Duration = Duration::from_secs(2);

struct Session {
    started: Instant,
    /// Bytes on disk before this transfer began.
    base: u64,
    persist: ProgressTicker,
}

impl JobController {
    pub(super) async fn drive(&self, mut transfer: Transfer, generation: u64) {
        let mut session = Session {
            started: Instant::now(),
            base: self.inner.job.lock().await.bytes_transferred,
            persist: ProgressTicker::new(PERSIST_INTERVAL),
        };
        while let Some(event) = transfer.next_event().await {
            match event {
                TransferEvent::Progress { received } => self.on_progress(received, &mut session).await,
                TransferEvent::ChunkClosed { index, received } => {
                    let mut job = self.inner.job.lock().await;
                    if let Some(c) = job.chunks.iter_mut().find(|c| c.index == index) {
                        c.received = received;
                        c.closed = true;
                    }
                    if let Err(e) = self.persist(&job).await {
                        tracing::warn!(job_id = job.id, error = %e, "failed to persist chunk state");
                    }
                }
                TransferEvent::Finished { outcome, chunks } => {
                    self.finish(outcome, Some(chunks), generation).await;
                    return;
                }
            }
        }
        let lost = CoreError::Invalid("transfer ended without a result".into());
        self.finish(TransferOutcome::Failed(lost), None, generation)
            .await;
    }

    async fn on_progress(&self, received: u64, session: &mut Session) {
        let mut job = self.inner.job.lock().await;
        // Never report going backwards within one transfer.
        if received > job.bytes_transferred {
            job.bytes_transferred = received;
        }
        let stats = ProgressStats {
            bytes_done: job.bytes_transferred,
            total_bytes: job.total_size,
            session_bytes: job.bytes_transferred.saturating_sub(session.base),
            elapsed: session.started.elapsed(),
            chunks_done: job.chunks.iter().filter(|c| c.closed).count(),
            chunk_count: job.chunks.len(),
        };
        tracing::trace!(
            job_id = job.id,
            bytes = stats.bytes_done,
            chunks_done = stats.chunks_done,
            eta_secs = ?stats.eta_secs(),
            "progress"
        );
        self.inner.ctx.events.emit(CoreEvent::Progress {
            job_id: job.id,
            bytes_transferred: job.bytes_transferred,
            total_size: job.total_size,
            bytes_per_sec: stats.bytes_per_sec() as u64,
        });
        if session.persist.due() {
            if let Err(e) = self.persist(&job).await {
                tracing::warn!(job_id = job.id, error = %e, "failed to persist progress");
            }
        }
    }

    fn clear_live(&self, generation: u64) {
        let mut live = self
            .inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if live.as_ref().is_some_and(|l| l.generation == generation) {
            *live = None;
        }
    }

    async fn finish(
        &self,
        outcome: TransferOutcome,
        chunks: Option<Vec<Chunk>>,
        generation: u64,
    ) {
        let mut job = self.inner.job.lock().await;
        if let Some(chunks) = chunks {
            let on_disk: u64 = chunks.iter().map(|c| c.received).sum();
            job.chunks = chunks;
            job.bytes_transferred = job.bytes_transferred.max(on_disk);
        }

        let settled = match outcome {
            TransferOutcome::Completed if job.status == JobStatus::Stopping => {
                self.commit(&mut job, JobStatus::Stopped).await
            }
            TransferOutcome::Completed => {
                drop(job);
                let result = self.merge_and_verify().await;
                job = self.inner.job.lock().await;
                self.complete(&mut job, result).await
            }
            TransferOutcome::Interrupted(Signal::Pause) if job.status == JobStatus::Downloading => {
                self.commit(&mut job, JobStatus::Paused).await
            }
            TransferOutcome::Interrupted(_) | TransferOutcome::Failed(_)
                if job.status == JobStatus::Stopping =>
            {
                self.commit(&mut job, JobStatus::Stopped).await
            }
            TransferOutcome::Interrupted(signal) => {
                let err = CoreError::Invalid(format!("transfer interrupted by {:?}", signal));
                self.record_failure(&mut job, &err).await
            }
            TransferOutcome::Failed(err) => self.record_failure(&mut job, &err).await,
        };
        if let Err(e) = settled {
            tracing::warn!(job_id = job.id, error = %e, "failed to settle job");
        }

        match job.status {
            JobStatus::Completed => {
                tracing::info!(job_id = job.id, bytes = job.bytes_transferred, "download completed");
                self.inner
                    .ctx
                    .events
                    .emit(CoreEvent::DownloadCompleted(job.id));
            }
            JobStatus::Stopped => self
                .inner
                .ctx
                .events
                .emit(CoreEvent::DownloadStopped(job.id)),
            _ => {}
        }
        self.clear_live(generation);
        self.notify(&job);
    }

    async fn record_failure(&self, job: &mut Job, err: &CoreError) -> CoreResult<()> {
        let recorded = JobError::from(err);
        tracing::warn!(job_id = job.id, error = %recorded.message, "download failed");
        job.last_error = Some(recorded.clone());
        let r = self.commit(job, JobStatus::Error).await;
        self.inner.ctx.events.emit(CoreEvent::DownloadFailed {
            job_id: job.id,
            error: recorded,
        });
        r
    }

    /// Downloading → Merging, then assemble and check the file without holding the job lock.
    async fn merge_and_verify(&self) -> CoreResult<u64> {
        let (final_path, chunks, expected) = {
            let mut job = self.inner.job.lock().await;
            self.commit(&mut job, JobStatus::Merging).await?;
            (job.final_path(), job.chunks.clone(), job.expected_sha256.clone())
        };
        let limiters = Limiters::default().with(Arc::clone(&self.inner.ctx.merge_limiter));
        let control = self.live().map(|l| l.control).unwrap_or_default();
        let total = transfer::merge(&final_path, chunks, limiters, control).await?;
        if let Some(expected) = expected {
            let path = final_path.clone();
            tokio::task::spawn_blocking(move || verify_sha256(&path, &expected))
                .await
                .map_err(|e| CoreError::Invalid(format!("checksum task failed: {}", e)))??;
        }
        Ok(total)
    }

    async fn complete(&self, job: &mut Job, merged: CoreResult<u64>) -> CoreResult<()> {
        match merged {
            Ok(total) => {
                job.total_size = Some(total);
                job.bytes_transferred = total;
                self.commit(job, JobStatus::Completed).await
            }
            // Downloading (merge never started) and Merging both fail into Error.
            Err(e) => self.record_failure(job, &e).await,
        }
    }
}
