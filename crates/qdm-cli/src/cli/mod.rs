//! CLI for the QDM download manager.

mod commands;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime, Weekday};
use clap::{Args, Parser, Subcommand};
use qdm_core::{JobId, Orchestrator, QueueId};
use std::path::PathBuf;

use commands::{
    run_add, run_download, run_queue_add, run_queue_list, run_queue_move, run_queue_start,
    run_queue_stop, run_remove, run_status,
};

/// Top-level CLI for the QDM download manager.
#[derive(Debug, Parser)]
#[command(name = "qdm")]
#[command(about = "QDM: segmented downloads organized in scheduled queues", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a download job without starting it.
    Add(AddArgs),

    /// Show jobs and their progress.
    Status {
        /// Only jobs of this queue.
        #[arg(long, value_name = "QUEUE")]
        queue: Option<QueueId>,
    },

    /// Manage queues.
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Download jobs in the foreground until they finish (Ctrl-C stops them resumably).
    Download {
        /// Job identifiers.
        #[arg(required = true)]
        ids: Vec<JobId>,
    },

    /// Remove a job by ID.
    Remove {
        /// Job identifier.
        id: JobId,
        /// Also delete chunk files (and the finished file of a completed job).
        #[arg(long)]
        delete_files: bool,
    },
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// HTTP, HTTPS or FTP URL to download.
    pub url: String,
    /// File name to save as; derived from the URL when omitted.
    #[arg(long, short = 'o', value_name = "NAME")]
    pub name: Option<String>,
    /// Directory to save into; overrides the category directory.
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
    /// Category name from the config; inferred from the extension when omitted.
    #[arg(long)]
    pub category: Option<String>,
    /// Queue to append the job to.
    #[arg(long, short = 'q', value_name = "QUEUE")]
    pub queue: Option<QueueId>,
    /// Expected SHA-256 (hex) of the finished file.
    #[arg(long, value_name = "HEX")]
    pub sha256: Option<String>,
    /// Speed limit such as 500K or 2M (bytes per second).
    #[arg(long, value_name = "RATE", value_parser = parse_rate)]
    pub limit: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Create a queue.
    Add(QueueAddArgs),

    /// List queues.
    List,

    /// Run a queue in the foreground until it finishes or its window closes for good.
    Start {
        /// Queue identifier.
        id: QueueId,
    },

    /// Mark a queue stopped.
    Stop {
        /// Queue identifier.
        id: QueueId,
    },

    /// Move a job to a new position (0 = first) within its queue.
    Move {
        /// Job identifier.
        job: JobId,
        /// Target position; clamped to the end of the queue.
        index: usize,
    },
}

#[derive(Debug, Args)]
pub struct QueueAddArgs {
    pub title: String,
    /// Jobs downloading at the same time.
    #[arg(long, short = 'c', default_value = "1")]
    pub concurrency: u32,
    /// Automatic retries of a failed job.
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,
    /// Resume paused members when the queue starts.
    #[arg(long)]
    pub include_paused: bool,
    /// Window opening time (HH:MM).
    #[arg(long, value_name = "HH:MM", value_parser = parse_time)]
    pub from: Option<NaiveTime>,
    /// Window closing time (HH:MM); earlier than --from means overnight.
    #[arg(long, value_name = "HH:MM", value_parser = parse_time, requires = "from")]
    pub to: Option<NaiveTime>,
    /// Weekdays of a daily window, e.g. mon,tue,fri.
    #[arg(long, value_delimiter = ',', value_parser = parse_weekday, requires = "from")]
    pub days: Vec<Weekday>,
    /// Single date (YYYY-MM-DD) for a one-off window.
    #[arg(long, value_name = "DATE", value_parser = parse_date, requires = "from", conflicts_with = "days")]
    pub date: Option<NaiveDate>,
}

/// `HH:MM` or `HH:MM:SS`.
pub(crate) fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| format!("invalid time '{s}': {e}"))
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date '{s}': {e}"))
}

pub(crate) fn parse_weekday(s: &str) -> Result<Weekday, String> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| format!("invalid weekday '{s}'"))
}

/// Plain bytes, or a K/M/G suffix (powers of 1024).
pub(crate) fn parse_rate(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, scale) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let scale = match c.to_ascii_uppercase() {
                'K' => 1024,
                'M' => 1024 * 1024,
                'G' => 1024 * 1024 * 1024,
                _ => return Err(format!("unknown unit in '{s}'")),
            };
            (&s[..i], scale)
        }
        _ => (s, 1),
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid rate '{s}'"))?;
    n.checked_mul(scale)
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("rate '{s}' out of range"))
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let orch = Orchestrator::open_default()
            .await
            .context("open download state")?;
        tracing::debug!(config = ?orch.config(), "loaded config");

        match cli.command {
            CliCommand::Add(args) => run_add(&orch, args).await?,
            CliCommand::Status { queue } => run_status(&orch, queue).await?,
            CliCommand::Queue(QueueCommand::Add(args)) => run_queue_add(&orch, args).await?,
            CliCommand::Queue(QueueCommand::List) => run_queue_list(&orch).await?,
            CliCommand::Queue(QueueCommand::Start { id }) => run_queue_start(&orch, id).await?,
            CliCommand::Queue(QueueCommand::Stop { id }) => run_queue_stop(&orch, id).await?,
            CliCommand::Queue(QueueCommand::Move { job, index }) => {
                run_queue_move(&orch, job, index).await?
            }
            CliCommand::Download { ids } => run_download(&orch, &ids).await?,
            CliCommand::Remove { id, delete_files } => run_remove(&orch, id, delete_files).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
