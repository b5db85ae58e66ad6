//! Foreground event loop shared by `download` and `queue start`.

use anyhow::Result;
use qdm_core::{CoreEvent, JobId, Orchestrator, QueueId};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};

use super::format_bytes;

const PRINT_INTERVAL: Duration = Duration::from_millis(500);

/// What to wait for before returning.
pub(crate) enum Until {
    /// Every listed job has completed, failed or stopped.
    Jobs(HashSet<JobId>),
    /// The queue finished or was stopped.
    Queue(QueueId),
}

#[derive(Debug, Default)]
pub(crate) struct Summary {
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
    /// Ctrl-C stopped everything before the target was reached.
    pub interrupted: bool,
}

pub(crate) async fn follow(
    orch: &Orchestrator,
    rx: &mut broadcast::Receiver<CoreEvent>,
    mut until: Until,
) -> Result<Summary> {
    let mut summary = Summary::default();
    let mut last_print: HashMap<JobId, Instant> = HashMap::new();
    if matches!(&until, Until::Jobs(pending) if pending.is_empty()) {
        return Ok(summary);
    }
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let event = tokio::select! {
            _ = &mut ctrl_c => {
                println!("\nStopping; run the same command again to continue.");
                orch.shutdown().await;
                summary.interrupted = true;
                return Ok(summary);
            }
            event = rx.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "progress display fell behind");
                continue;
            }
            Err(RecvError::Closed) => return Ok(summary),
        };

        let settled = match event {
            CoreEvent::Progress {
                job_id,
                bytes_transferred,
                total_size,
                bytes_per_sec,
            } => {
                let now = Instant::now();
                let due = last_print
                    .get(&job_id)
                    .map_or(true, |t| now.duration_since(*t) >= PRINT_INTERVAL);
                if due {
                    print_progress(job_id, bytes_transferred, total_size, bytes_per_sec);
                    last_print.insert(job_id, now);
                }
                None
            }
            CoreEvent::DownloadCompleted(job_id) => {
                println!("  [{job_id}] completed");
                summary.completed += 1;
                Some(job_id)
            }
            CoreEvent::DownloadFailed { job_id, error } => {
                println!("  [{job_id}] failed: {}", error.message);
                summary.failed += 1;
                Some(job_id)
            }
            CoreEvent::DownloadStopped(job_id) => {
                println!("  [{job_id}] stopped");
                summary.stopped += 1;
                Some(job_id)
            }
            CoreEvent::QueueFinished(id) | CoreEvent::QueueStopped(id)
                if matches!(until, Until::Queue(q) if q == id) =>
            {
                return Ok(summary);
            }
            _ => None,
        };

        if let (Some(job_id), Until::Jobs(pending)) = (settled, &mut until) {
            pending.remove(&job_id);
            if pending.is_empty() {
                return Ok(summary);
            }
        }
    }
}

fn print_progress(job_id: JobId, done: u64, total: Option<u64>, bytes_per_sec: u64) {
    let rate = format_bytes(bytes_per_sec);
    match total {
        Some(total) if total > 0 => println!(
            "  [{job_id}] {} / {} ({:.1}%)  {rate}/s",
            format_bytes(done),
            format_bytes(total),
            done as f64 * 100.0 / total as f64
        ),
        _ => println!("  [{job_id}] {}  {rate}/s", format_bytes(done)),
    }
}
