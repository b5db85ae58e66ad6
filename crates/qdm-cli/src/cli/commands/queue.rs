//! `qdm queue ...` – create, list, run and reorder queues.

use anyhow::Result;
use qdm_core::{JobId, NewQueue, Orchestrator, QueueId, Schedule};

use super::follow::{follow, Until};
use crate::cli::QueueAddArgs;

pub async fn run_queue_add(orch: &Orchestrator, args: QueueAddArgs) -> Result<()> {
    let schedule = match (args.from, args.date) {
        (None, _) => Schedule::always(),
        (Some(from), Some(date)) => Schedule::once(date, from, args.to),
        (Some(from), None) => Schedule::daily(from, args.to, args.days),
    };
    let retries = args.retries.unwrap_or(0);
    let queue = orch
        .add_queue(NewQueue {
            title: args.title,
            concurrency: args.concurrency,
            schedule,
            retry_on_failure: retries > 0,
            retry_count: retries,
            include_paused: args.include_paused,
        })
        .await?;
    println!("Added queue {} '{}'", queue.id, queue.title);
    Ok(())
}

pub async fn run_queue_list(orch: &Orchestrator) -> Result<()> {
    let queues = orch.queues().await?;
    if queues.is_empty() {
        println!("No queues.");
        return Ok(());
    }
    println!(
        "{:<6} {:<20} {:>4} {:>5} {:<8} {}",
        "ID", "TITLE", "CONC", "JOBS", "STATE", "SCHEDULE"
    );
    for q in queues {
        let members = orch.queue_members(q.id).await?.len();
        let state = if q.is_running { "running" } else { "idle" };
        let title = if q.is_default {
            format!("{} *", q.title)
        } else {
            q.title.clone()
        };
        println!(
            "{:<6} {:<20} {:>4} {:>5} {:<8} {}",
            q.id,
            title,
            q.concurrency,
            members,
            state,
            describe(&q.schedule)
        );
    }
    Ok(())
}

/// Start the queue and stay attached until it finishes.
pub async fn run_queue_start(orch: &Orchestrator, id: QueueId) -> Result<()> {
    let mut rx = orch.subscribe();
    orch.load().await?;
    let queue = orch.start_queue(id).await?;
    println!("Queue {} '{}' running (Ctrl-C to stop)", queue.id, queue.title);
    let summary = follow(orch, &mut rx, Until::Queue(id)).await?;
    println!(
        "{} completed, {} failed, {} stopped",
        summary.completed, summary.failed, summary.stopped
    );
    Ok(())
}

pub async fn run_queue_stop(orch: &Orchestrator, id: QueueId) -> Result<()> {
    let queue = orch.stop_queue(id).await?;
    println!("Queue {} '{}' stopped", queue.id, queue.title);
    Ok(())
}

pub async fn run_queue_move(orch: &Orchestrator, job: JobId, index: usize) -> Result<()> {
    let members = orch.move_in_queue(job, index).await?;
    for (position, j) in members.iter().enumerate() {
        let marker = if j.id == job { ">" } else { " " };
        println!("{marker} {position:>3}  {:<6} {}", j.id, j.file_name);
    }
    Ok(())
}

fn describe(schedule: &Schedule) -> String {
    let Some(start) = schedule.start_time else {
        return "always".to_string();
    };
    let stop = schedule
        .stop_time
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "24:00".to_string());
    let window = format!("{}-{}", start.format("%H:%M"), stop);
    if schedule.is_daily {
        if schedule.days.is_empty() {
            format!("{window} daily")
        } else {
            let days: Vec<String> = schedule.days.iter().map(|d| d.to_string()).collect();
            format!("{window} {}", days.join(","))
        }
    } else {
        match schedule.just_for_date {
            Some(date) => format!("{window} on {date}"),
            None => format!("{window} any day"),
        }
    }
}
