//! Guarded status changes.

use crate::error::{CoreError, CoreResult};
use crate::model::{Job, JobStatus};

/// Move `job` to `to` if the state machine allows it.
pub(crate) fn transition(job: &mut Job, to: JobStatus) -> CoreResult<()> {
    if !job.status.can_transition(to) {
        return Err(CoreError::InvalidTransition {
            job_id: job.id,
            from: job.status,
            to,
        });
    }
    job.status = to;
    job.touch();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rejects_illegal_edge_without_mutating() {
        let mut job = Job::new("http://h/x", "x", PathBuf::from("/tmp"));
        job.status = JobStatus::Completed;
        let err = transition(&mut job, JobStatus::Downloading).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Downloading,
                ..
            }
        ));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn allowed_edge_updates_status() {
        let mut job = Job::new("http://h/x", "x", PathBuf::from("/tmp"));
        transition(&mut job, JobStatus::Downloading).unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
    }
}
