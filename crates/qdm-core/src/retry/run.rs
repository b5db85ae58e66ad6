//! Retry loop: run a chunk attempt until success or the policy says stop.

use super::classify;
use super::error::ChunkError;
use super::policy::{RetryDecision, RetryPolicy};
use crate::throttle::sleep_interruptible;

/// Runs `f` until it succeeds, fails permanently, or `interrupted` fires
/// during a backoff sleep (reported as `ChunkError::Interrupted`).
pub fn run_with_retry<F>(
    policy: &RetryPolicy,
    interrupted: impl Fn() -> bool,
    mut f: F,
) -> Result<(), ChunkError>
where
    F: FnMut(u32) -> Result<(), ChunkError>,
{
    let mut attempt = 1u32;
    loop {
        match f(attempt) {
            Ok(()) => return Ok(()),
            Err(e) => {
                if interrupted() {
                    return Err(ChunkError::Interrupted);
                }
                match policy.decide(attempt, classify::classify(&e)) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        tracing::debug!(attempt, delay_ms = d.as_millis() as u64, error = %e, "chunk retry");
                        if !sleep_interruptible(d, &interrupted) {
                            return Err(ChunkError::Interrupted);
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
}
