use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Weekday};
use tokio::sync::broadcast;

use super::*;
use crate::clock::ManualClock;
use crate::job::{DuplicateAction, FixedDuplicatePolicy};
use crate::model::Schedule;
use crate::repository::MemoryRepository;

fn config(dir: &Path) -> QdmConfig {
    QdmConfig {
        download_dir: Some(dir.to_path_buf()),
        ..Default::default()
    }
}

fn orchestrator(dir: &Path) -> Orchestrator {
    Orchestrator::new(Arc::new(MemoryRepository::new()), config(dir))
}

fn changes(rx: &mut broadcast::Receiver<CoreEvent>) -> Vec<ChangeScope> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Changed(scope) = event {
            out.push(scope);
        }
    }
    out
}

async fn wait_for(rx: &mut broadcast::Receiver<CoreEvent>, wanted: CoreEvent) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if event == wanted => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event did not arrive");
}

#[tokio::test]
async fn load_reconciles_stored_state() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());
    let queue = repo.add_queue(Queue::new("night")).await.unwrap();
    let mut ids = Vec::new();
    for (priority, status) in [(0, JobStatus::Downloading), (3, JobStatus::Paused), (7, JobStatus::Merging)] {
        let mut job = Job::new(
            format!("http://example.invalid/{priority}.bin"),
            format!("{priority}.bin"),
            dir.path().to_path_buf(),
        );
        job.queue_id = Some(queue.id);
        job.priority = priority;
        job.status = status;
        ids.push(repo.add_job(job).await.unwrap().id);
    }

    let orch = Orchestrator::new(repo.clone(), config(dir.path()));
    orch.load().await.unwrap();
    orch.load().await.unwrap();

    let members = orch.queue_members(queue.id).await.unwrap();
    let statuses: Vec<_> = members.iter().map(|j| j.status).collect();
    assert_eq!(
        statuses,
        vec![JobStatus::Stopped, JobStatus::Paused, JobStatus::Stopped]
    );
    let priorities: Vec<_> = members.iter().map(|j| j.priority).collect();
    assert_eq!(priorities, vec![0, 1, 2]);
    assert_eq!(members.iter().map(|j| j.id).collect::<Vec<_>>(), ids);

    let queues = orch.queues().await.unwrap();
    assert_eq!(queues.iter().filter(|q| q.is_default).count(), 1);
    assert_eq!(orch.default_queue().await.unwrap().title, "Main queue");
}

#[tokio::test]
async fn add_job_resolves_name_category_and_directory() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());

    let job = orch
        .add_job(NewJob::new("http://example.invalid/media/clip.mkv"), false)
        .await
        .unwrap();
    assert_eq!(job.file_name, "clip.mkv");
    assert_eq!(job.category.as_deref(), Some("Video"));
    assert_eq!(job.save_dir, dir.path().join("Video"));
    assert!(job.save_dir.is_dir());
    assert_eq!(job.status, JobStatus::Idle);

    let explicit = dir.path().join("elsewhere");
    let job = orch
        .add_job(
            NewJob {
                file_name: Some("../notes.txt".into()),
                save_dir: Some(explicit.clone()),
                expected_sha256: Some(" ABCD ".into()),
                ..NewJob::new("http://example.invalid/a")
            },
            false,
        )
        .await
        .unwrap();
    assert_eq!(job.save_dir, explicit);
    assert!(!job.file_name.contains('/'));
    assert_eq!(job.expected_sha256.as_deref(), Some("abcd"));

    let job = orch
        .add_job(
            NewJob {
                category: Some("documents".into()),
                ..NewJob::new("http://example.invalid/b")
            },
            false,
        )
        .await
        .unwrap();
    assert_eq!(job.save_dir, dir.path().join("Documents"));
}

#[tokio::test]
async fn add_job_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    for url in ["not a url", "file:///etc/passwd"] {
        let err = orch.add_job(NewJob::new(url), false).await.unwrap_err();
        assert!(matches!(err, CoreError::Invalid(_)), "{url}: {err}");
    }
    let err = orch
        .add_job(
            NewJob {
                category: Some("nope".into()),
                ..NewJob::new("http://example.invalid/x.zip")
            },
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Invalid(_)));

    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let err = orch
        .add_job(
            NewJob {
                save_dir: Some(blocker.join("sub")),
                ..NewJob::new("http://example.invalid/y.zip")
            },
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Scheduling(_)), "{err}");
    assert!(orch.jobs(&JobFilter::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicates_follow_the_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let url = "http://example.invalid/pkg.deb";

    let orch = orchestrator(dir.path());
    let first = orch.add_job(NewJob::new(url), false).await.unwrap();
    let second = orch.add_job(NewJob::new(url), false).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.file_name, "pkg (1).deb");

    let orch = orchestrator(dir.path())
        .with_duplicate_strategy(Arc::new(FixedDuplicatePolicy(None)));
    let first = orch.add_job(NewJob::new(url), false).await.unwrap();
    let err = orch.add_job(NewJob::new(url), false).await.unwrap_err();
    match err {
        CoreError::DuplicateConflict { existing, .. } => assert_eq!(existing, first.id),
        other => panic!("unexpected {other}"),
    }

    let orch = orchestrator(dir.path()).with_duplicate_strategy(Arc::new(FixedDuplicatePolicy(
        Some(DuplicateAction::ResumeExisting),
    )));
    let first = orch.add_job(NewJob::new(url), false).await.unwrap();
    let again = orch.add_job(NewJob::new(url), false).await.unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(orch.jobs(&JobFilter::all()).await.unwrap().len(), 1);

    let orch = orchestrator(dir.path()).with_duplicate_strategy(Arc::new(FixedDuplicatePolicy(
        Some(DuplicateAction::Overwrite),
    )));
    let first = orch.add_job(NewJob::new(url), false).await.unwrap();
    let replaced = orch.add_job(NewJob::new(url), false).await.unwrap();
    assert_ne!(first.id, replaced.id);
    assert_eq!(replaced.file_name, first.file_name);
    let all = orch.jobs(&JobFilter::all()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(matches!(orch.job(first.id).await, Err(CoreError::JobNotFound(_))));
}

#[tokio::test]
async fn membership_keeps_priorities_dense() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    let queue = orch.add_queue(NewQueue::new("batch")).await.unwrap();
    let mut ids = Vec::new();
    for i in 0..4 {
        let job = orch
            .add_job(
                NewJob {
                    queue_id: Some(queue.id),
                    ..NewJob::new(format!("http://example.invalid/{i}.bin"))
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(job.priority, i);
        ids.push(job.id);
    }
    let order = |jobs: Vec<Job>| jobs.into_iter().map(|j| j.id).collect::<Vec<_>>();

    let moved = orch.move_in_queue(ids[3], 0).await.unwrap();
    assert_eq!(order(moved), vec![ids[3], ids[0], ids[1], ids[2]]);

    // Swapping two members leaves every other pair in order.
    let swapped = orch.swap_in_queue(ids[0], ids[2]).await.unwrap();
    assert_eq!(order(swapped), vec![ids[3], ids[2], ids[1], ids[0]]);

    orch.remove_from_queue(ids[1]).await.unwrap();
    let members = orch.queue_members(queue.id).await.unwrap();
    assert_eq!(
        members.iter().map(|j| j.priority).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(order(members), vec![ids[3], ids[2], ids[0]]);
    assert_eq!(orch.job(ids[1]).await.unwrap().queue_id, None);

    let other = orch.add_queue(NewQueue::new("other")).await.unwrap();
    let job = orch.add_to_queue(ids[3], other.id).await.unwrap();
    assert_eq!((job.queue_id, job.priority), (Some(other.id), 0));
    assert_eq!(order(orch.queue_members(queue.id).await.unwrap()), vec![ids[2], ids[0]]);

    let err = orch.swap_in_queue(ids[3], ids[2]).await.unwrap_err();
    assert!(matches!(err, CoreError::Invalid(_)));
    let err = orch.move_in_queue(ids[1], 0).await.unwrap_err();
    assert!(matches!(err, CoreError::Invalid(_)));
}

#[tokio::test]
async fn queue_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    orch.load().await.unwrap();
    let default = orch.default_queue().await.unwrap();
    let err = orch.delete_queue(default.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Invalid(_)));

    let err = orch
        .add_queue(NewQueue {
            concurrency: 0,
            ..NewQueue::new("bad")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Invalid(_)));

    let queue = orch.add_queue(NewQueue::new("temp")).await.unwrap();
    let updated = orch
        .update_queue(
            queue.id,
            QueueUpdate {
                concurrency: Some(3),
                retry_on_failure: Some(true),
                retry_count: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.concurrency, 3);
    assert!(updated.retry_on_failure);
    assert_eq!(updated.title, "temp");

    let job = orch
        .add_job(
            NewJob {
                queue_id: Some(queue.id),
                ..NewJob::new("http://example.invalid/z.iso")
            },
            false,
        )
        .await
        .unwrap();
    orch.delete_queue(queue.id).await.unwrap();
    assert!(matches!(
        orch.queue(queue.id).await,
        Err(CoreError::QueueNotFound(_))
    ));
    assert_eq!(orch.job(job.id).await.unwrap().queue_id, None);
}

#[tokio::test]
async fn each_mutation_announces_one_change() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    let mut rx = orch.subscribe();

    let queue = orch.add_queue(NewQueue::new("q")).await.unwrap();
    assert_eq!(changes(&mut rx), vec![ChangeScope::Queues]);

    let job = orch
        .add_job(NewJob::new("http://example.invalid/a.zip"), false)
        .await
        .unwrap();
    assert_eq!(changes(&mut rx), vec![ChangeScope::Job(job.id)]);

    orch.add_to_queue(job.id, queue.id).await.unwrap();
    assert_eq!(changes(&mut rx), vec![ChangeScope::Jobs]);

    assert!(orch.remove_job(9999, false).await.is_err());
    assert_eq!(changes(&mut rx), vec![ChangeScope::Job(9999)]);

    // Stop on a job that never ran is a no-op, but still a facade call.
    assert_eq!(orch.stop_job(job.id).await.unwrap(), JobStatus::Idle);
    assert_eq!(orch.stop_job(job.id).await.unwrap(), JobStatus::Idle);
    assert_eq!(changes(&mut rx).len(), 2);

    let err = orch.pause_job(job.id).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn empty_queue_finishes_right_away() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    let mut rx = orch.subscribe();
    let queue = orch.add_queue(NewQueue::new("empty")).await.unwrap();
    let started = orch.start_queue(queue.id).await.unwrap();
    assert!(started.is_running);
    wait_for(&mut rx, CoreEvent::QueueStarted(queue.id)).await;
    wait_for(&mut rx, CoreEvent::QueueFinished(queue.id)).await;
    assert!(!orch.queue(queue.id).await.unwrap().is_running);
}

#[tokio::test]
async fn closed_window_holds_jobs_until_it_opens() {
    let dir = tempfile::tempdir().unwrap();
    let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(
        monday.and_time(NaiveTime::from_hms_opt(8, 0, 0).unwrap()),
    ));
    let orch = orchestrator(dir.path()).with_clock(clock.clone());
    let queue = orch
        .add_queue(NewQueue {
            schedule: Schedule::daily(nine, Some(NaiveTime::from_hms_opt(17, 0, 0).unwrap()), vec![Weekday::Mon]),
            ..NewQueue::new("office hours")
        })
        .await
        .unwrap();
    // Nothing listens on port 9; once admitted the probe fails fast.
    let job = orch
        .add_job(
            NewJob {
                queue_id: Some(queue.id),
                ..NewJob::new("http://127.0.0.1:9/file.bin")
            },
            false,
        )
        .await
        .unwrap();

    orch.start_queue(queue.id).await.unwrap();
    orch.reevaluate().await;
    assert_eq!(orch.job(job.id).await.unwrap().status, JobStatus::Idle);
    // A manual start is deferred while the window is closed.
    assert_eq!(orch.start_job(job.id).await.unwrap(), JobStatus::Idle);

    clock.set(monday.and_time(nine));
    orch.reevaluate().await;
    let job = orch.job(job.id).await.unwrap();
    assert_ne!(job.status, JobStatus::Idle);
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.last_error.is_some());
}
