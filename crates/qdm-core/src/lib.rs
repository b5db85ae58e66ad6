pub mod config;
pub mod logging;

pub mod checksum;
pub mod clock;
pub mod error;
pub mod events;
pub mod fetch_head;
pub mod job;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod segmenter;
pub mod storage;
pub mod throttle;
pub mod transfer;
pub mod url_model;

pub use error::{CoreError, CoreResult};
pub use events::{ChangeScope, CoreEvent};
pub use model::{Job, JobFilter, JobId, JobStatus, Queue, QueueId, Schedule};
pub use orchestrator::{NewJob, NewQueue, Orchestrator, QueueUpdate};
