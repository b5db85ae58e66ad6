//! What to do when a URL that already has a job is added again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateAction {
    /// Replace the existing job and its files with the new one.
    Overwrite,
    /// Add the new job under a free `name (N).ext`.
    KeepBoth,
    /// Do not add anything; hand back the existing job.
    ResumeExisting,
}

/// Asked once, when a duplicate is added. `None` leaves the conflict unresolved.
#[async_trait]
pub trait DuplicateStrategy: Send + Sync {
    async fn resolve(&self, url: &str, existing: &Job) -> Option<DuplicateAction>;
}

/// Non-interactive strategy: always the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedDuplicatePolicy(pub Option<DuplicateAction>);

#[async_trait]
impl DuplicateStrategy for FixedDuplicatePolicy {
    async fn resolve(&self, _url: &str, _existing: &Job) -> Option<DuplicateAction> {
        self.0
    }
}
