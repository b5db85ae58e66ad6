//! Persistence of jobs and queues.
//!
//! The core only talks to the `Repository` trait. `MemoryRepository` keeps
//! everything in process (tests, embedding); `SqliteRepository` stores rows in
//! `~/.local/state/qdm/qdm.db` through sqlx.

mod memory;
mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Job, JobFilter, JobId, Queue, QueueId};

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

/// Storage of job and queue records. Every call is atomic on its own.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;
    /// Insert `job`, ignoring its `id`; returns the stored record with the assigned id.
    async fn add_job(&self, job: Job) -> Result<Job>;
    async fn update_job(&self, job: &Job) -> Result<()>;
    async fn delete_job(&self, id: JobId) -> Result<()>;
    /// Matching jobs ordered by priority, then id.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>>;
    async fn add_queue(&self, queue: Queue) -> Result<Queue>;
    async fn update_queue(&self, queue: &Queue) -> Result<()>;
    async fn delete_queue(&self, id: QueueId) -> Result<()>;
    /// All queues ordered by id.
    async fn list_queues(&self) -> Result<Vec<Queue>>;
}
