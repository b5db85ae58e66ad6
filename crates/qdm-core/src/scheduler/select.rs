//! Admission decisions over a snapshot of queue members.

use std::collections::HashSet;

use crate::model::{Job, JobId, JobStatus, Queue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum How {
    Start,
    Retry,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Admission {
    pub job_id: JobId,
    pub how: How,
}

fn occupies(job: &Job, include_paused: bool) -> bool {
    job.status.is_active() || (include_paused && job.status == JobStatus::Paused)
}

/// Slots in use.
pub(super) fn occupied(members: &[Job], include_paused: bool) -> usize {
    members
        .iter()
        .filter(|j| occupies(j, include_paused))
        .count()
}

fn candidate(job: &Job, revive: &HashSet<JobId>, due: &HashSet<JobId>) -> Option<How> {
    match job.status {
        JobStatus::Idle => Some(How::Start),
        JobStatus::Error if due.contains(&job.id) => Some(How::Retry),
        JobStatus::Error | JobStatus::Stopped if revive.contains(&job.id) => Some(How::Start),
        JobStatus::Paused if revive.contains(&job.id) => Some(How::Resume),
        _ => None,
    }
}

/// Members to admit now, in priority order. `members` must already be
/// sorted by priority. Paused members that already hold a slot are resumed
/// first since they do not change occupancy.
pub(super) fn admissions(
    members: &[Job],
    queue: &Queue,
    revive: &HashSet<JobId>,
    due: &HashSet<JobId>,
) -> Vec<Admission> {
    let ceiling = queue.concurrency.max(1) as usize;
    let mut used = occupied(members, queue.include_paused);
    let mut picked = Vec::new();

    if queue.include_paused {
        picked.extend(
            members
                .iter()
                .filter(|j| j.status == JobStatus::Paused && revive.contains(&j.id))
                .map(|j| Admission {
                    job_id: j.id,
                    how: How::Resume,
                }),
        );
    }

    for job in members {
        if used >= ceiling {
            break;
        }
        if queue.include_paused && job.status == JobStatus::Paused {
            continue;
        }
        if let Some(how) = candidate(job, revive, due) {
            picked.push(Admission { job_id: job.id, how });
            used += 1;
        }
    }
    picked
}

/// Nothing occupying, nothing paused, nothing waiting for a slot or a retry.
///
/// A Paused member keeps the queue running even with `include_paused` off:
/// it is not admitted again, but the user may resume it by hand, and the
/// queue stays up to hand its slot on when it settles.
pub(super) fn is_finished(members: &[Job], revive: &HashSet<JobId>, pending_retries: bool) -> bool {
    let no_candidates = members
        .iter()
        .all(|j| candidate(j, revive, &HashSet::new()).is_none());
    !pending_retries
        && no_candidates
        && members
            .iter()
            .all(|j| !j.status.is_active() && j.status != JobStatus::Paused)
}
