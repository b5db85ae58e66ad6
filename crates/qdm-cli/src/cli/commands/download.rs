//! `qdm download <id>...` – run jobs in the foreground until they settle.

use anyhow::{bail, Result};
use qdm_core::{JobId, JobStatus, Orchestrator};
use std::collections::HashSet;

use super::follow::{follow, Until};

pub async fn run_download(orch: &Orchestrator, ids: &[JobId]) -> Result<()> {
    let mut rx = orch.subscribe();
    orch.load().await?;

    let mut pending = HashSet::new();
    for &id in ids {
        let job = orch.job(id).await?;
        if job.status == JobStatus::Completed {
            println!("Job {id} is already complete: {}", job.final_path().display());
            continue;
        }
        match orch.start_job(id).await {
            Ok(status) => {
                tracing::debug!(job_id = id, %status, "download requested");
                println!("Job {id}: {} ({status})", job.file_name);
                pending.insert(id);
            }
            Err(e) => eprintln!("Job {id}: {e}"),
        }
    }

    let summary = follow(orch, &mut rx, Until::Jobs(pending)).await?;
    if summary.interrupted {
        return Ok(());
    }
    let mut failed = 0;
    for &id in ids {
        if orch.job(id).await?.status != JobStatus::Completed {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} job(s) did not complete");
    }
    Ok(())
}
