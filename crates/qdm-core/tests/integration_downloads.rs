//! Integration tests: single jobs against a local range-capable server.
//!
//! Covers multi-chunk transfers, probe fallbacks, pause/resume and stop/start
//! round trips, per-job, global and merge speed caps, checksum verification,
//! server-supplied file names and resume refusal when the source loses range
//! support.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::range_server::RangeServer;
use common::{payload, wait_for};
use qdm_core::checksum::sha256_path;
use qdm_core::config::QdmConfig;
use qdm_core::model::FailureKind;
use qdm_core::repository::{MemoryRepository, SqliteRepository};
use qdm_core::retry::RetryPolicy;
use qdm_core::{CoreError, CoreEvent, JobFilter, JobId, JobStatus, NewJob, Orchestrator};
use tempfile::tempdir;
use tokio::sync::broadcast;

const LONG: Duration = Duration::from_secs(30);

fn config(dir: &Path) -> QdmConfig {
    QdmConfig {
        download_dir: Some(dir.to_path_buf()),
        max_chunks: 4,
        min_chunk_bytes: 16 * 1024,
        progress_interval_ms: 50,
        connect_timeout_secs: 5,
        retry: RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
        },
        ..Default::default()
    }
}

async fn orchestrator(dir: &Path) -> Orchestrator {
    let orch = Orchestrator::new(Arc::new(MemoryRepository::new()), config(dir));
    orch.load().await.unwrap();
    orch
}

fn settled(job_id: JobId) -> impl Fn(&CoreEvent) -> bool {
    move |e| match e {
        CoreEvent::DownloadCompleted(id) | CoreEvent::DownloadStopped(id) => *id == job_id,
        CoreEvent::DownloadFailed { job_id: id, .. } => *id == job_id,
        _ => false,
    }
}

async fn first_progress(rx: &mut broadcast::Receiver<CoreEvent>, job_id: JobId) {
    wait_for(rx, LONG, |e| {
        matches!(e, CoreEvent::Progress { job_id: id, bytes_transferred, .. } if *id == job_id && *bytes_transferred > 0)
    })
    .await;
}

#[tokio::test]
async fn multi_chunk_download_matches_source() {
    let server = RangeServer::start(payload(256 * 1024));
    let dir = tempdir().unwrap();
    let orch = orchestrator(dir.path()).await;
    let mut rx = orch.subscribe();

    let job = orch
        .add_job(NewJob::new(server.url("big.bin")), true)
        .await
        .unwrap();
    let seen = wait_for(&mut rx, LONG, settled(job.id)).await;
    assert_eq!(seen.last(), Some(&CoreEvent::DownloadCompleted(job.id)));

    let done = orch.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.total_size, Some(256 * 1024));
    assert_eq!(done.bytes_transferred, 256 * 1024);
    assert_eq!(done.chunks.len(), 4);
    assert!(done.resumable);
    assert_eq!(std::fs::read(done.final_path()).unwrap(), server.body());
    assert!(!dir.path().join("big.bin.chunk0").exists());
    assert!(!dir.path().join("big.bin.part").exists());

    let reported: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            CoreEvent::Progress {
                job_id,
                bytes_transferred,
                ..
            } if *job_id == job.id => Some(*bytes_transferred),
            _ => None,
        })
        .collect();
    assert!(reported.windows(2).all(|w| w[0] <= w[1]), "{reported:?}");
}

#[tokio::test]
async fn head_blocked_falls_back_to_range_probe() {
    let server = RangeServer::start(payload(64 * 1024));
    server.set_head_allowed(false);
    let dir = tempdir().unwrap();
    let orch = orchestrator(dir.path()).await;
    let mut rx = orch.subscribe();

    let job = orch.add_job(NewJob::new(server.url("probe.bin")), true).await.unwrap();
    wait_for(&mut rx, LONG, settled(job.id)).await;
    let done = orch.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.resumable);
    assert!(done.chunks.len() > 1);
    assert_eq!(std::fs::read(done.final_path()).unwrap(), server.body());
}

#[tokio::test]
async fn server_without_ranges_gets_one_stream() {
    let server = RangeServer::start(payload(64 * 1024));
    server.set_ranges(false);
    let dir = tempdir().unwrap();
    let orch = orchestrator(dir.path()).await;
    let mut rx = orch.subscribe();

    let job = orch.add_job(NewJob::new(server.url("plain.bin")), true).await.unwrap();
    wait_for(&mut rx, LONG, settled(job.id)).await;
    let done = orch.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(!done.resumable);
    assert_eq!(done.chunks.len(), 1);
    assert_eq!(std::fs::read(done.final_path()).unwrap(), server.body());
}

#[tokio::test]
async fn pause_then_resume_is_byte_identical() {
    let server = RangeServer::start(payload(512 * 1024));
    server.set_piece_delay(Duration::from_millis(10));
    let dir = tempdir().unwrap();
    let orch = orchestrator(dir.path()).await;
    let mut rx = orch.subscribe();

    let job = orch.add_job(NewJob::new(server.url("pause.bin")), true).await.unwrap();
    first_progress(&mut rx, job.id).await;

    assert_eq!(orch.pause_job(job.id).await.unwrap(), JobStatus::Paused);
    assert_eq!(orch.pause_job(job.id).await.unwrap(), JobStatus::Paused);
    let paused = orch.job(job.id).await.unwrap();
    assert!(paused.bytes_transferred > 0);
    assert!(paused.bytes_transferred < 512 * 1024);
    let on_disk: u64 = paused.chunks.iter().map(|c| c.received).sum();
    assert!(on_disk > 0 && on_disk <= paused.bytes_transferred);

    server.set_piece_delay(Duration::ZERO);
    assert_eq!(orch.resume_job(job.id).await.unwrap(), JobStatus::Downloading);
    let seen = wait_for(&mut rx, LONG, settled(job.id)).await;
    assert_eq!(seen.last(), Some(&CoreEvent::DownloadCompleted(job.id)));

    let done = orch.job(job.id).await.unwrap();
    assert_eq!(done.bytes_transferred, 512 * 1024);
    assert_eq!(std::fs::read(done.final_path()).unwrap(), server.body());
}

#[tokio::test]
async fn stop_is_idempotent_and_start_continues() {
    let server = RangeServer::start(payload(512 * 1024));
    server.set_piece_delay(Duration::from_millis(10));
    let dir = tempdir().unwrap();
    let orch = orchestrator(dir.path()).await;
    let mut rx = orch.subscribe();

    let job = orch.add_job(NewJob::new(server.url("stop.bin")), true).await.unwrap();
    first_progress(&mut rx, job.id).await;

    assert_eq!(orch.stop_job(job.id).await.unwrap(), JobStatus::Stopped);
    assert_eq!(orch.stop_job(job.id).await.unwrap(), JobStatus::Stopped);
    let stopped = orch.job(job.id).await.unwrap();
    assert!(!stopped.chunks.is_empty(), "stop keeps offsets");

    server.set_piece_delay(Duration::ZERO);
    orch.start_job(job.id).await.unwrap();
    wait_for(&mut rx, LONG, |e| *e == CoreEvent::DownloadCompleted(job.id)).await;
    let done = orch.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(std::fs::read(done.final_path()).unwrap(), server.body());
}

#[tokio::test]
async fn resume_after_source_drops_ranges_is_refused() {
    let server = RangeServer::start(payload(512 * 1024));
    server.set_piece_delay(Duration::from_millis(10));
    let dir = tempdir().unwrap();
    let orch = orchestrator(dir.path()).await;
    let mut rx = orch.subscribe();

    let job = orch.add_job(NewJob::new(server.url("flaky.bin")), true).await.unwrap();
    first_progress(&mut rx, job.id).await;
    orch.pause_job(job.id).await.unwrap();
    let before = orch.job(job.id).await.unwrap().bytes_transferred;

    server.set_ranges(false);
    server.set_piece_delay(Duration::ZERO);
    let err = orch.resume_job(job.id).await.unwrap_err();
    assert!(matches!(err, CoreError::ResumeUnsupported(_)), "{err}");
    let failed = orch.job(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(
        failed.last_error.as_ref().map(|e| e.kind),
        Some(FailureKind::ResumeUnsupported)
    );
    assert_eq!(failed.bytes_transferred, before, "no silent restart");

    // A manual retry starts over as a single stream.
    orch.retry_job(job.id).await.unwrap();
    wait_for(&mut rx, LONG, |e| *e == CoreEvent::DownloadCompleted(job.id)).await;
    let done = orch.job(job.id).await.unwrap();
    assert_eq!(done.chunks.len(), 1);
    assert_eq!(std::fs::read(done.final_path()).unwrap(), server.body());
    assert!(!dir.path().join("flaky.bin.chunk1").exists());
}

#[tokio::test]
async fn speed_limit_paces_the_transfer() {
    let server = RangeServer::start(payload(384 * 1024));
    let dir = tempdir().unwrap();
    let orch = orchestrator(dir.path()).await;
    let mut rx = orch.subscribe();

    let started = Instant::now();
    let job = orch
        .add_job(
            NewJob {
                speed_limit: Some(128 * 1024),
                ..NewJob::new(server.url("slow.bin"))
            },
            true,
        )
        .await
        .unwrap();
    wait_for(&mut rx, LONG, |e| *e == CoreEvent::DownloadCompleted(job.id)).await;
    // One second of burst, then 256 KiB at 128 KiB/s.
    assert!(started.elapsed() >= Duration::from_millis(1500), "{:?}", started.elapsed());
    let done = orch.job(job.id).await.unwrap();
    assert_eq!(std::fs::read(done.final_path()).unwrap(), server.body());
}

#[tokio::test]
async fn checksum_is_verified_after_merge() {
    let server = RangeServer::start(payload(48 * 1024));
    let dir = tempdir().unwrap();
    let reference = dir.path().join("reference");
    std::fs::write(&reference, server.body()).unwrap();
    let digest = sha256_path(&reference).unwrap();

    let orch = orchestrator(dir.path()).await;
    let mut rx = orch.subscribe();
    let good = orch
        .add_job(
            NewJob {
                expected_sha256: Some(digest.to_uppercase()),
                ..NewJob::new(server.url("good.bin"))
            },
            true,
        )
        .await
        .unwrap();
    wait_for(&mut rx, LONG, settled(good.id)).await;
    assert_eq!(orch.job(good.id).await.unwrap().status, JobStatus::Completed);

    let bad = orch
        .add_job(
            NewJob {
                expected_sha256: Some("00".repeat(32)),
                ..NewJob::new(server.url("bad.bin"))
            },
            true,
        )
        .await
        .unwrap();
    let seen = wait_for(&mut rx, LONG, settled(bad.id)).await;
    assert!(matches!(seen.last(), Some(CoreEvent::DownloadFailed { .. })));
    let failed = orch.job(bad.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(failed.last_error.map(|e| e.kind), Some(FailureKind::Transfer));
}

#[tokio::test]
async fn sqlite_state_survives_a_reload() {
    let server = RangeServer::start(payload(32 * 1024));
    let dir = tempdir().unwrap();
    let db = dir.path().join("state").join("qdm.db");
    std::fs::create_dir_all(db.parent().unwrap()).unwrap();

    let job_id = {
        let repo = SqliteRepository::open_at(&db).await.unwrap();
        let orch = Orchestrator::new(Arc::new(repo), config(dir.path()));
        orch.load().await.unwrap();
        let mut rx = orch.subscribe();
        let job = orch.add_job(NewJob::new(server.url("kept.bin")), true).await.unwrap();
        wait_for(&mut rx, LONG, settled(job.id)).await;
        job.id
    };

    let repo = SqliteRepository::open_at(&db).await.unwrap();
    let orch = Orchestrator::new(Arc::new(repo), config(dir.path()));
    orch.load().await.unwrap();
    let job = orch.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.bytes_transferred, 32 * 1024);
    assert_eq!(orch.jobs(&JobFilter::all()).await.unwrap().len(), 1);
    let defaults = orch.queues().await.unwrap().into_iter().filter(|q| q.is_default).count();
    assert_eq!(defaults, 1);
}

#[tokio::test]
async fn global_cap_is_shared_between_jobs() {
    let server = RangeServer::start(payload(256 * 1024));
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(
        Arc::new(MemoryRepository::new()),
        QdmConfig {
            global_bytes_per_sec: Some(128 * 1024),
            ..config(dir.path())
        },
    );
    orch.load().await.unwrap();
    let mut rx = orch.subscribe();

    let started = Instant::now();
    let a = orch.add_job(NewJob::new(server.url("a.bin")), true).await.unwrap();
    let b = orch.add_job(NewJob::new(server.url("b.bin")), true).await.unwrap();
    for id in [a.id, b.id] {
        if orch.job(id).await.unwrap().status != JobStatus::Completed {
            wait_for(&mut rx, LONG, |e| *e == CoreEvent::DownloadCompleted(id)).await;
        }
    }
    // 512 KiB through one 128 KiB/s budget: one second of burst, then three.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2500), "{elapsed:?}");
    for id in [a.id, b.id] {
        let done = orch.job(id).await.unwrap();
        assert_eq!(std::fs::read(done.final_path()).unwrap(), server.body());
    }
}

#[tokio::test]
async fn merge_cap_paces_assembly() {
    let server = RangeServer::start(payload(192 * 1024));
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(
        Arc::new(MemoryRepository::new()),
        QdmConfig {
            merge_bytes_per_sec: Some(64 * 1024),
            ..config(dir.path())
        },
    );
    orch.load().await.unwrap();
    let mut rx = orch.subscribe();

    let job = orch.add_job(NewJob::new(server.url("merged.bin")), true).await.unwrap();
    wait_for(&mut rx, LONG, |e| {
        *e == CoreEvent::JobStatusChanged {
            job_id: job.id,
            status: JobStatus::Merging,
        }
    })
    .await;
    let merging = Instant::now();
    wait_for(&mut rx, LONG, |e| *e == CoreEvent::DownloadCompleted(job.id)).await;
    // 64 KiB of burst, then 128 KiB at 64 KiB/s.
    let elapsed = merging.elapsed();
    assert!(elapsed >= Duration::from_millis(1500), "{elapsed:?}");
    let done = orch.job(job.id).await.unwrap();
    assert_eq!(std::fs::read(done.final_path()).unwrap(), server.body());
}

#[tokio::test]
async fn server_file_name_replaces_url_name() {
    let server = RangeServer::start(payload(16 * 1024));
    server.set_disposition("attachment; filename=\"report.pdf\"");
    let dir = tempdir().unwrap();
    let orch = orchestrator(dir.path()).await;
    let mut rx = orch.subscribe();

    let derived = orch.add_job(NewJob::new(server.url("download")), true).await.unwrap();
    wait_for(&mut rx, LONG, settled(derived.id)).await;
    let done = orch.job(derived.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.file_name, "report.pdf");
    assert_eq!(std::fs::read(dir.path().join("report.pdf")).unwrap(), server.body());

    let chosen = orch
        .add_job(
            NewJob {
                file_name: Some("mine.bin".into()),
                ..NewJob::new(server.url("other"))
            },
            true,
        )
        .await
        .unwrap();
    wait_for(&mut rx, LONG, settled(chosen.id)).await;
    let done = orch.job(chosen.id).await.unwrap();
    assert_eq!(done.file_name, "mine.bin");
    assert!(done.final_path().exists());
}
