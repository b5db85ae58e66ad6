//! Job status and the allowed transitions between statuses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Downloading,
    Paused,
    Merging,
    Stopping,
    Stopped,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Merging => "merging",
            JobStatus::Stopping => "stopping",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Unknown strings map to `Error` so a corrupt row surfaces instead of running.
    pub fn parse(s: &str) -> Self {
        match s {
            "idle" => JobStatus::Idle,
            "downloading" => JobStatus::Downloading,
            "paused" => JobStatus::Paused,
            "merging" => JobStatus::Merging,
            "stopping" => JobStatus::Stopping,
            "stopped" => JobStatus::Stopped,
            "completed" => JobStatus::Completed,
            _ => JobStatus::Error,
        }
    }

    /// True if `self -> to` is an edge of the job state machine.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Idle, Downloading)
                | (Downloading, Paused)
                | (Downloading, Merging)
                | (Downloading, Stopping)
                | (Downloading, Error)
                | (Paused, Downloading)
                | (Paused, Stopping)
                | (Paused, Error)
                | (Merging, Completed)
                | (Merging, Error)
                | (Stopping, Stopped)
                | (Stopped, Idle)
                | (Error, Idle)
                | (Error, Downloading)
        )
    }

    /// Holds a concurrency slot: bytes are moving or being flushed/assembled.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Downloading | JobStatus::Merging | JobStatus::Stopping
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
