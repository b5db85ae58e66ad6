//! `qdm status` – show jobs and their progress.

use anyhow::Result;
use qdm_core::{Job, JobFilter, Orchestrator, QueueId};

use super::format_bytes;

pub async fn run_status(orch: &Orchestrator, queue: Option<QueueId>) -> Result<()> {
    let jobs = match queue {
        Some(id) => orch.queue_members(id).await?,
        None => orch.jobs(&JobFilter::all()).await?,
    };
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    println!(
        "{:<6} {:<12} {:>8} {:>22} {:<6} {}",
        "ID", "STATUS", "DONE", "SIZE", "QUEUE", "FILE"
    );
    for j in jobs {
        println!(
            "{:<6} {:<12} {:>8} {:>22} {:<6} {}",
            j.id,
            j.status.as_str(),
            percent(&j),
            size(&j),
            j.queue_id
                .map(|q| q.to_string())
                .unwrap_or_else(|| "-".to_string()),
            j.file_name
        );
        if let Some(err) = &j.last_error {
            println!("       {:?}: {}", err.kind, err.message);
        }
    }
    Ok(())
}

fn percent(job: &Job) -> String {
    match job.total_size {
        Some(0) => "100.0%".to_string(),
        Some(total) => format!("{:.1}%", job.bytes_transferred as f64 * 100.0 / total as f64),
        None => "-".to_string(),
    }
}

fn size(job: &Job) -> String {
    match job.total_size {
        Some(total) => format!(
            "{} / {}",
            format_bytes(job.bytes_transferred),
            format_bytes(total)
        ),
        None => format_bytes(job.bytes_transferred),
    }
}
