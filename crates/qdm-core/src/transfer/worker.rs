//! One chunk, start to finish: open its file, fetch the missing range with
//! retries, flush before reporting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::control::TransferControl;
use super::handler::{ChunkHandler, HandlerFailure};
use crate::error::TransferError;
use crate::retry::{run_with_retry, ChunkError, RetryPolicy};
use crate::segmenter::Chunk;
use crate::storage::{chunk_path, ChunkFile};
use crate::throttle::Limiters;

/// Settings shared by every chunk worker of one transfer.
#[derive(Clone)]
pub(super) struct ChunkContext {
    pub(super) url: String,
    pub(super) final_path: PathBuf,
    /// Source honors range requests; otherwise a retry restarts from byte zero.
    pub(super) ranged: bool,
    pub(super) limiters: Limiters,
    pub(super) retry: RetryPolicy,
    pub(super) connect_timeout: Duration,
    pub(super) control: TransferControl,
    pub(super) counters: Arc<Vec<AtomicU64>>,
}

pub(super) fn run_chunk(ctx: &ChunkContext, chunk: Chunk) -> Result<(), ChunkError> {
    let path = chunk_path(&ctx.final_path, chunk.index);
    let mut file = Some(ChunkFile::open(&path, chunk.received)?);
    run_with_retry(&ctx.retry, || ctx.control.is_interrupted(), |attempt| {
        let mut current = match file.take() {
            Some(f) => f,
            None => ChunkFile::open(&path, 0)?,
        };
        if !ctx.ranged && current.len() > 0 {
            tracing::debug!(chunk = chunk.index, attempt, "source ignores ranges, restarting chunk");
            current = ChunkFile::open(&path, 0)?;
        }
        publish(ctx, chunk.index, current.len());
        let (result, returned) = attempt_chunk(ctx, &chunk, current);
        file = returned;
        result
    })
}

fn publish(ctx: &ChunkContext, index: usize, received: u64) {
    if let Some(c) = ctx.counters.get(index) {
        c.store(received, Ordering::Release);
    }
}

/// One HTTP request for the unfetched part of `chunk`. Hands the file back so
/// the next attempt continues from its length.
fn attempt_chunk(
    ctx: &ChunkContext,
    chunk: &Chunk,
    file: ChunkFile,
) -> (Result<(), ChunkError>, Option<ChunkFile>) {
    let received = file.len();
    let capacity = chunk.len();
    if capacity.is_some_and(|c| received >= c) {
        return (Ok(()), Some(file));
    }
    let probe = Chunk { received, ..*chunk };
    let range = if ctx.ranged {
        probe.range_header_value()
    } else {
        None
    };

    let handler = ChunkHandler {
        file: Some(file),
        request_offset: probe.next_offset(),
        ranged_request: range.is_some(),
        capacity,
        response_headers: Vec::new(),
        response_ok: None,
        failure: None,
        control: ctx.control.clone(),
        limiters: ctx.limiters.clone(),
        counters: Arc::clone(&ctx.counters),
        index: chunk.index,
    };
    let mut easy = curl::easy::Easy2::new(handler);
    let setup = configure(&mut easy, ctx, range.as_deref());
    let perform = setup.and_then(|()| easy.perform().map_err(TransferError::Curl));
    let code = easy.response_code().unwrap_or(0);

    let handler = easy.get_mut();
    let file = handler.file.take();
    let failure = handler.failure.take();
    let Some(file) = file else {
        return (Err(ChunkError::Interrupted), None);
    };
    if let Err(e) = file.sync() {
        return (Err(e.into()), Some(file));
    }
    let have = file.len();
    let complete = match capacity {
        Some(c) => have >= c,
        None => perform.is_ok() && (200..300).contains(&code),
    };
    if complete {
        return (Ok(()), Some(file));
    }
    if ctx.control.is_interrupted() {
        return (Err(ChunkError::Interrupted), Some(file));
    }
    let err = match (failure, perform) {
        (Some(HandlerFailure::Storage(e)), _) => ChunkError::Storage(e),
        (Some(HandlerFailure::Transfer(e)), _) => ChunkError::Transfer(e),
        (None, Err(e)) => ChunkError::Transfer(e),
        (None, Ok(())) if !(200..300).contains(&code) => {
            ChunkError::Transfer(TransferError::Http(code))
        }
        (None, Ok(())) => ChunkError::Transfer(TransferError::PartialTransfer {
            expected: capacity.unwrap_or(have),
            received: have,
        }),
    };
    (Err(err), Some(file))
}

fn configure(
    easy: &mut curl::easy::Easy2<ChunkHandler>,
    ctx: &ChunkContext,
    range: Option<&str>,
) -> Result<(), TransferError> {
    apply_options(easy, ctx, range).map_err(TransferError::Curl)
}

fn apply_options(
    easy: &mut curl::easy::Easy2<ChunkHandler>,
    ctx: &ChunkContext,
    range: Option<&str>,
) -> Result<(), curl::Error> {
    easy.url(&ctx.url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(ctx.connect_timeout)?;
    // Stalled connection: under 1 byte/s for a minute. No wall-clock cap since
    // throttled chunks can run for hours.
    easy.low_speed_limit(1)?;
    easy.low_speed_time(Duration::from_secs(60))?;
    easy.progress(true)?;
    if let Some(r) = range {
        // curl wants the value without the `bytes=` unit.
        easy.range(r.trim_start_matches("bytes="))?;
    }
    Ok(())
}
