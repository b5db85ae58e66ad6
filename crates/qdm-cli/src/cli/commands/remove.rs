//! `qdm remove <id>` – forget a job, optionally deleting its files.

use anyhow::Result;
use qdm_core::{JobId, Orchestrator};

pub async fn run_remove(orch: &Orchestrator, id: JobId, delete_files: bool) -> Result<()> {
    orch.remove_job(id, delete_files).await?;
    if delete_files {
        println!("Removed job {id} and its files.");
    } else {
        println!("Removed job {id}.");
    }
    Ok(())
}
