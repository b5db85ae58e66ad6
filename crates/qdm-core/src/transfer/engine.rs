//! Drives the chunk workers of one transfer and reports upward.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::control::{Signal, TransferControl};
use super::worker::{run_chunk, ChunkContext};
use super::{TransferEvent, TransferOutcome, TransferPlan};
use crate::error::CoreError;
use crate::retry::ChunkError;
use crate::segmenter::Chunk;

/// Handle to a running transfer: its control signal and event stream.
/// The stream always ends with exactly one `TransferEvent::Finished`.
pub struct Transfer {
    control: TransferControl,
    events: UnboundedReceiver<TransferEvent>,
}

impl Transfer {
    pub fn control(&self) -> &TransferControl {
        &self.control
    }

    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }
}

/// Start moving bytes for every chunk of `plan` that is not closed yet.
/// Must be called from within a tokio runtime.
pub fn start(plan: TransferPlan) -> Transfer {
    let control = TransferControl::new();
    let (tx, rx) = unbounded_channel();
    let ctl = control.clone();
    tokio::task::spawn_blocking(move || run_transfer(plan, ctl, tx));
    Transfer {
        control,
        events: rx,
    }
}

fn total_received(chunks: &[Chunk], counters: &[AtomicU64]) -> u64 {
    chunks
        .iter()
        .zip(counters)
        .map(|(c, n)| n.load(Ordering::Acquire).max(c.received))
        .sum()
}

fn run_transfer(
    plan: TransferPlan,
    control: TransferControl,
    events: UnboundedSender<TransferEvent>,
) {
    let mut chunks = plan.chunks.clone();
    let counters: Arc<Vec<AtomicU64>> =
        Arc::new(chunks.iter().map(|c| AtomicU64::new(c.received)).collect());
    let ctx = ChunkContext {
        url: plan.url.clone(),
        final_path: plan.final_path.clone(),
        ranged: plan.ranged,
        limiters: plan.limiters.clone(),
        retry: plan.retry,
        connect_timeout: plan.connect_timeout,
        control: control.clone(),
        counters: Arc::clone(&counters),
    };
    let pending: Vec<Chunk> = chunks.iter().filter(|c| !c.closed).copied().collect();
    tracing::debug!(
        job_id = plan.job_id,
        chunks = chunks.len(),
        pending = pending.len(),
        ranged = plan.ranged,
        "transfer started"
    );

    let mut failure: Option<CoreError> = None;
    let (tx, rx) = mpsc::channel::<(usize, Result<(), ChunkError>)>();
    std::thread::scope(|s| {
        for chunk in pending {
            let tx = tx.clone();
            let ctx = &ctx;
            s.spawn(move || {
                let result = run_chunk(ctx, chunk);
                let _ = tx.send((chunk.index, result));
            });
        }
        drop(tx);

        loop {
            match rx.recv_timeout(plan.progress_interval) {
                Ok((index, Ok(()))) => {
                    if let Some(c) = chunks.iter_mut().find(|c| c.index == index) {
                        c.received = counters[index].load(Ordering::Acquire);
                        c.closed = true;
                        let _ = events.send(TransferEvent::ChunkClosed {
                            index,
                            received: c.received,
                        });
                    }
                }
                Ok((index, Err(e))) => {
                    if let Some(err) = e.into_core() {
                        tracing::warn!(job_id = plan.job_id, chunk = index, error = %err, "chunk failed");
                        if failure.is_none() {
                            control.request(Signal::Failed);
                            failure = Some(err);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let _ = events.send(TransferEvent::Progress {
                        received: total_received(&chunks, &counters),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    for c in chunks.iter_mut() {
        c.received = counters[c.index].load(Ordering::Acquire);
    }
    let received = total_received(&chunks, &counters);
    let _ = events.send(TransferEvent::Progress { received });

    let outcome = if chunks.iter().all(|c| c.closed) {
        TransferOutcome::Completed
    } else if let Some(err) = failure {
        TransferOutcome::Failed(err)
    } else {
        TransferOutcome::Interrupted(control.signal().unwrap_or(Signal::Stop))
    };
    tracing::debug!(job_id = plan.job_id, received, outcome = ?outcome, "transfer finished");
    let _ = events.send(TransferEvent::Finished { outcome, chunks });
}
