//! `qdm add <url>` – record a new download job.

use anyhow::Result;
use qdm_core::{NewJob, Orchestrator};

use crate::cli::AddArgs;

pub async fn run_add(orch: &Orchestrator, args: AddArgs) -> Result<()> {
    let request = NewJob {
        url: args.url,
        file_name: args.name,
        save_dir: args.dir,
        category: args.category,
        queue_id: args.queue,
        expected_sha256: args.sha256,
        speed_limit: args.limit,
    };
    let job = orch.add_job(request, false).await?;
    println!(
        "Added job {} -> {}",
        job.id,
        job.final_path().display()
    );
    if let Some(queue_id) = job.queue_id {
        println!("  queue {queue_id}, position {}", job.priority);
    }
    Ok(())
}
