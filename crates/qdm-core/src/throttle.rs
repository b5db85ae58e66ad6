//! Token-bucket bandwidth limiting.
//!
//! Each bucket holds up to one second of tokens. `reserve` always succeeds and
//! may drive the balance negative (debt); the caller sleeps for the returned
//! duration before reading more. Rates can be changed while transfers run.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Longest single sleep, so pause/stop signals are noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct BucketState {
    rate: Option<u64>,
    tokens: f64,
    last: Instant,
}

/// Shared bandwidth limiter. `None` or `Some(0)` rate means unlimited.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate: Option<u64>) -> Self {
        let rate = rate.filter(|r| *r > 0);
        Self {
            state: Mutex::new(BucketState {
                rate,
                tokens: rate.unwrap_or(0) as f64,
                last: Instant::now(),
            }),
        }
    }

    pub fn shared(rate: Option<u64>) -> Arc<Self> {
        Arc::new(Self::new(rate))
    }

    pub fn rate(&self) -> Option<u64> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).rate
    }

    /// Change the rate; outstanding debt is kept so pacing stays smooth.
    pub fn set_rate(&self, rate: Option<u64>) {
        let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let rate = rate.filter(|r| *r > 0);
        s.rate = rate;
        s.last = Instant::now();
        match rate {
            Some(r) => s.tokens = s.tokens.min(r as f64),
            None => s.tokens = 0.0,
        }
    }

    /// Take `n` tokens and return how long the caller must wait before the
    /// bytes are considered paid for.
    pub fn reserve(&self, n: u64) -> Duration {
        let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rate) = s.rate else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        let elapsed = now.duration_since(s.last).as_secs_f64();
        s.last = now;
        s.tokens = (s.tokens + elapsed * rate as f64).min(rate as f64);
        s.tokens -= n as f64;
        if s.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-s.tokens / rate as f64)
        }
    }
}

/// Set of buckets a byte stream must pass through (per job, global, merge).
#[derive(Debug, Clone, Default)]
pub struct Limiters {
    buckets: Vec<Arc<TokenBucket>>,
}

impl Limiters {
    pub fn new(buckets: Vec<Arc<TokenBucket>>) -> Self {
        Self { buckets }
    }

    pub fn with(mut self, bucket: Arc<TokenBucket>) -> Self {
        self.buckets.push(bucket);
        self
    }

    /// Charge `n` bytes to every bucket and block for the longest wait.
    /// Sleeps in short slices; returns `false` early when `interrupted` fires.
    pub fn throttle(&self, n: u64, interrupted: impl Fn() -> bool) -> bool {
        let wait = self
            .buckets
            .iter()
            .map(|b| b.reserve(n))
            .max()
            .unwrap_or(Duration::ZERO);
        sleep_interruptible(wait, interrupted)
    }
}

/// Sleep for `total`, checking `interrupted` between slices. Returns `false` if interrupted.
pub fn sleep_interruptible(total: Duration, interrupted: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if interrupted() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_waits() {
        let b = TokenBucket::new(None);
        assert_eq!(b.reserve(1 << 30), Duration::ZERO);
        let b = TokenBucket::new(Some(0));
        assert_eq!(b.rate(), None);
        assert_eq!(b.reserve(1 << 30), Duration::ZERO);
    }

    #[test]
    fn debt_turns_into_wait() {
        let b = TokenBucket::new(Some(1000));
        // Full bucket covers the first second.
        assert_eq!(b.reserve(1000), Duration::ZERO);
        let wait = b.reserve(500);
        assert!(wait > Duration::from_millis(400), "{wait:?}");
        assert!(wait <= Duration::from_millis(500), "{wait:?}");
    }

    #[test]
    fn set_rate_switches_to_unlimited() {
        let b = TokenBucket::new(Some(10));
        b.set_rate(None);
        assert_eq!(b.reserve(10_000), Duration::ZERO);
        b.set_rate(Some(100));
        assert_eq!(b.rate(), Some(100));
        assert!(b.reserve(1_000) > Duration::ZERO);
    }

    #[test]
    fn layered_limiters_take_the_slowest() {
        let fast = TokenBucket::shared(Some(1_000_000));
        let slow = TokenBucket::shared(Some(100));
        let l = Limiters::new(vec![fast, slow.clone()]);
        slow.reserve(100);
        let start = Instant::now();
        assert!(l.throttle(10, || false));
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn throttle_stops_when_interrupted() {
        let l = Limiters::default().with(TokenBucket::shared(Some(1)));
        let start = Instant::now();
        assert!(!l.throttle(1_000, || true));
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
