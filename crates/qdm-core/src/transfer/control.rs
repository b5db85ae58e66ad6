//! Cooperative stop signal shared between a job and its chunk workers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Why a running transfer should wind down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Pause,
    Stop,
    Cancel,
    /// A chunk failed permanently; siblings stop so the job can report it.
    Failed,
}

const RUN: u8 = 0;

impl Signal {
    fn code(self) -> u8 {
        match self {
            Signal::Pause => 1,
            Signal::Stop => 2,
            Signal::Cancel => 3,
            Signal::Failed => 4,
        }
    }

    fn from_code(c: u8) -> Option<Self> {
        match c {
            1 => Some(Signal::Pause),
            2 => Some(Signal::Stop),
            3 => Some(Signal::Cancel),
            4 => Some(Signal::Failed),
            _ => None,
        }
    }
}

/// Checked on every write and every libcurl progress callback.
#[derive(Debug, Clone, Default)]
pub struct TransferControl {
    state: Arc<AtomicU8>,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise `signal`. The first signal wins; returns false if one was already raised.
    pub fn request(&self, signal: Signal) -> bool {
        self.state
            .compare_exchange(RUN, signal.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn signal(&self) -> Option<Signal> {
        Signal::from_code(self.state.load(Ordering::Acquire))
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUN
    }
}
