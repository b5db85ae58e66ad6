//! Progress snapshots for display: rate, ETA and fraction done.

use std::time::{Duration, Instant};

/// Snapshot of one job's transfer progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStats {
    /// Bytes on disk, including what earlier runs fetched.
    pub bytes_done: u64,
    pub total_bytes: Option<u64>,
    /// Bytes fetched by the current run only.
    pub session_bytes: u64,
    pub elapsed: Duration,
    pub chunks_done: usize,
    pub chunk_count: usize,
}

impl ProgressStats {
    /// Current-run rate in bytes per second (0 if no time elapsed).
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.session_bytes as f64 / secs
    }

    /// Estimated seconds remaining; `None` when the size or rate is unknown.
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total_bytes?.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        (rate > 0.0).then(|| remaining as f64 / rate)
    }

    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes? {
            0 => Some(1.0),
            t => Some((self.bytes_done as f64 / t as f64).min(1.0)),
        }
    }
}

/// Rate limiter for progress emission.
#[derive(Debug)]
pub(crate) struct ProgressTicker {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressTicker {
    pub(crate) fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// True at most once per interval.
    pub(crate) fn due(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(l) if now.duration_since(l) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
