use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use archiver_core::queue::payload::{QUEUE_BAGIT, QUEUE_EXIFTOOL, QUEUE_THUMBNAIL};
use archiver_core::queue::worker::JobRun;
use archiver_core::queue::{FailOutcome, Job, JobPayload, JobQueue, JobStatus, JobWorker, NewJob};
use archiver_core::storage::Database;
use archiver_core::{AppConfig, Error};
use rusqlite::params;
use tempfile::tempdir;

fn open_queue(path: &Path, lock_timeout: Duration, max_attempts: u32) -> JobQueue {
    JobQueue::new(Database::open(path).unwrap(), lock_timeout, max_attempts)
}

fn exif(n: u32) -> JobPayload {
    JobPayload::Exiftool {
        fingerprint: format!("{:016x}", n),
        archive_path: format!("/archive/locations/loc/00/{:016x}.jpg", n),
        kind: "image".into(),
    }
}

fn thumbnail(n: u32) -> JobPayload {
    JobPayload::Thumbnail {
        fingerprint: format!("{:016x}", n),
        archive_path: format!("/archive/locations/loc/00/{:016x}.jpg", n),
        kind: "image".into(),
    }
}

/// Skip the backoff so a retried job is claimable right away.
fn clear_backoff(queue: &JobQueue, job_id: &str) {
    queue
        .database()
        .connection()
        .execute("UPDATE job SET retry_after = NULL WHERE id = ?1", params![job_id])
        .unwrap();
}

#[test]
fn test_dependent_job_waits_for_dependency() {
    let tmp = tempdir().unwrap();
    let q = open_queue(&tmp.path().join("jobs.db"), Duration::from_secs(300), 3);

    let a = NewJob::new(exif(1));
    let b = NewJob::new(thumbnail(1)).depends_on(a.id.clone());
    let a_id = q.add_job(a).unwrap();
    let b_id = q.add_job(b).unwrap();

    for _ in 0..3 {
        assert!(
            q.claim_next(QUEUE_THUMBNAIL, "thumb-worker").unwrap().is_none(),
            "B must not be claimable while A is pending"
        );
    }

    let claimed_a = q.claim_next(QUEUE_EXIFTOOL, "exif-worker").unwrap().unwrap();
    assert_eq!(claimed_a.id, a_id);
    assert!(
        q.claim_next(QUEUE_THUMBNAIL, "thumb-worker").unwrap().is_none(),
        "B must not be claimable while A is active"
    );

    assert!(q.complete(&a_id, "exif-worker").unwrap());
    let claimed_b = q.claim_next(QUEUE_THUMBNAIL, "thumb-worker").unwrap().unwrap();
    assert_eq!(claimed_b.id, b_id);
    assert_eq!(claimed_b.depends_on.as_deref(), Some(a_id.as_str()));
}

#[test]
fn test_exhausted_job_is_dead_lettered_once() {
    let tmp = tempdir().unwrap();
    let q = open_queue(&tmp.path().join("jobs.db"), Duration::from_secs(300), 2);
    let id = q.add_job(NewJob::new(exif(7))).unwrap();

    q.claim_next(QUEUE_EXIFTOOL, "w").unwrap().unwrap();
    assert!(matches!(
        q.fail(&id, "w", "exiftool: unreadable header").unwrap(),
        FailOutcome::Retrying { attempts: 1, .. }
    ));
    assert!(q.list_dead_letter(QUEUE_EXIFTOOL).unwrap().is_empty());

    clear_backoff(&q, &id);
    q.claim_next(QUEUE_EXIFTOOL, "w").unwrap().unwrap();
    assert_eq!(
        q.fail(&id, "w", "exiftool: unreadable header").unwrap(),
        FailOutcome::DeadLettered { attempts: 2 }
    );
    // a late duplicate failure report must not add a second entry
    assert_eq!(q.fail(&id, "w", "again").unwrap(), FailOutcome::Ignored);

    let dead = q.list_dead_letter(QUEUE_EXIFTOOL).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, id);
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(dead[0].error.as_deref(), Some("exiftool: unreadable header"));

    let job = q.get_job(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(q.claim_next(QUEUE_EXIFTOOL, "w").unwrap().is_none());
    let stats = q.get_queue_stats(QUEUE_EXIFTOOL).unwrap();
    assert_eq!((stats.pending, stats.failed), (0, 1));
}

#[test]
fn test_retry_dead_letter_requeues_with_fresh_attempts() {
    let tmp = tempdir().unwrap();
    let q = open_queue(&tmp.path().join("jobs.db"), Duration::from_secs(300), 1);
    let id = q.add_job(NewJob::new(exif(3))).unwrap();
    q.claim_next(QUEUE_EXIFTOOL, "w").unwrap().unwrap();
    q.fail(&id, "w", "boom").unwrap();

    let entry = q.list_dead_letter(QUEUE_EXIFTOOL).unwrap().remove(0);
    assert!(q.retry_dead_letter(entry.id).unwrap());
    assert!(!q.retry_dead_letter(entry.id).unwrap(), "entry is consumed by the retry");
    assert!(q.list_dead_letter(QUEUE_EXIFTOOL).unwrap().is_empty());

    let job = q.claim_next(QUEUE_EXIFTOOL, "w").unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.payload, exif(3));
}

#[test]
fn test_acknowledge_unblocks_dependents() {
    let tmp = tempdir().unwrap();
    let q = open_queue(&tmp.path().join("jobs.db"), Duration::from_secs(300), 1);

    let parent = NewJob::new(exif(9));
    let child = NewJob::new(thumbnail(9)).depends_on(parent.id.clone());
    let ids = q.add_bulk(vec![parent, child]).unwrap();

    q.claim_next(QUEUE_EXIFTOOL, "w").unwrap().unwrap();
    q.fail(&ids[0], "w", "corrupt file").unwrap();
    assert!(
        q.claim_next(QUEUE_THUMBNAIL, "w").unwrap().is_none(),
        "a dead-lettered dependency keeps dependents waiting"
    );

    let entry = q.list_dead_letter(QUEUE_EXIFTOOL).unwrap().remove(0);
    assert_eq!(q.acknowledge_dead_letter(&[entry.id, 9999]).unwrap(), 1);
    assert!(q.get_job(&ids[0]).unwrap().is_none());

    let child = q.claim_next(QUEUE_THUMBNAIL, "w").unwrap().unwrap();
    assert_eq!(child.id, ids[1]);
}

#[test]
fn test_expired_lock_is_reclaimed() {
    let tmp = tempdir().unwrap();
    let q = open_queue(&tmp.path().join("jobs.db"), Duration::from_millis(20), 3);
    let id = q.add_job(NewJob::new(exif(4))).unwrap();

    let first = q.claim_next(QUEUE_EXIFTOOL, "crashed-worker").unwrap().unwrap();
    assert!(q.claim_next(QUEUE_EXIFTOOL, "w2").unwrap().is_none());

    thread::sleep(Duration::from_millis(60));
    let reclaimed = q.claim_next(QUEUE_EXIFTOOL, "w2").unwrap().unwrap();
    assert_eq!(reclaimed.id, id);
    assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));
    assert_eq!(reclaimed.attempts, first.attempts, "reclaiming is not a failed attempt");
    assert_eq!(reclaimed.started_at, first.started_at);
}

#[test]
fn test_reclaimed_job_ignores_previous_owner() {
    let tmp = tempdir().unwrap();
    let q = open_queue(&tmp.path().join("jobs.db"), Duration::from_millis(20), 3);
    let parent = NewJob::new(exif(6));
    let child = NewJob::new(thumbnail(6)).depends_on(parent.id.clone());
    let ids = q.add_bulk(vec![parent, child]).unwrap();

    q.claim_next(QUEUE_EXIFTOOL, "w1").unwrap().unwrap();
    thread::sleep(Duration::from_millis(60));
    let reclaimed = q.claim_next(QUEUE_EXIFTOOL, "w2").unwrap().unwrap();
    assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));

    // w1 wakes up after losing its lock
    assert!(!q.complete(&ids[0], "w1").unwrap());
    assert_eq!(q.fail(&ids[0], "w1", "stale").unwrap(), FailOutcome::Ignored);

    let job = q.get_job(&ids[0]).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.locked_by.as_deref(), Some("w2"));
    assert_eq!(job.attempts, 0);
    assert!(
        q.claim_next(QUEUE_THUMBNAIL, "w3").unwrap().is_none(),
        "dependents stay blocked while w2 still runs the job"
    );

    assert!(q.complete(&ids[0], "w2").unwrap());
    assert!(q.claim_next(QUEUE_THUMBNAIL, "w3").unwrap().is_some());
}

#[test]
fn test_concurrent_claims_never_share_a_job() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("jobs.db");
    let q = open_queue(&path, Duration::from_secs(300), 3);
    let queued: Vec<String> = (0..40).map(|n| q.add_job(NewJob::new(exif(n))).unwrap()).collect();

    let handles: Vec<_> = (0..4)
        .map(|w| {
            let path = path.clone();
            thread::spawn(move || {
                let q = open_queue(&path, Duration::from_secs(300), 3);
                let worker = format!("w{}", w);
                let mut claimed = Vec::new();
                while let Some(job) = q.claim_next(QUEUE_EXIFTOOL, &worker).unwrap() {
                    assert_eq!(job.locked_by.as_deref(), Some(worker.as_str()));
                    claimed.push(job.id);
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }
    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), queued.len(), "every job claimed exactly once");
    assert_eq!(unique.len(), queued.len());
    assert_eq!(q.get_queue_stats(QUEUE_EXIFTOOL).unwrap().active, 40);
}

#[test]
fn test_priority_then_age_ordering() {
    let tmp = tempdir().unwrap();
    let q = open_queue(&tmp.path().join("jobs.db"), Duration::from_secs(300), 3);

    let bagit = JobPayload::Bagit {
        session_id: "s".into(),
        location_id: "loc".into(),
        asset_count: 3,
    };
    let low = q.add_job(NewJob::new(bagit.clone()).with_priority(90)).unwrap();
    let first = q.add_job(NewJob::new(bagit.clone())).unwrap();
    let second = q.add_job(NewJob::new(bagit)).unwrap();

    let order: Vec<String> = (0..3)
        .map(|_| q.claim_next(QUEUE_BAGIT, "w").unwrap().unwrap().id)
        .collect();
    assert_eq!(order, vec![first, second, low]);
}

#[test]
fn test_purge_completed_keeps_recent_and_unfinished() {
    let tmp = tempdir().unwrap();
    let q = open_queue(&tmp.path().join("jobs.db"), Duration::from_secs(300), 3);
    let done = q.add_job(NewJob::new(exif(1))).unwrap();
    let pending = q.add_job(NewJob::new(exif(2)).with_priority(5)).unwrap();
    q.claim_next(QUEUE_EXIFTOOL, "w").unwrap().unwrap();
    q.complete(&done, "w").unwrap();

    assert_eq!(q.purge_completed(Duration::from_secs(3600)).unwrap(), 0);
    thread::sleep(Duration::from_millis(10));
    assert_eq!(q.purge_completed(Duration::ZERO).unwrap(), 1);
    assert!(q.get_job(&done).unwrap().is_none());
    assert!(q.get_job(&pending).unwrap().is_some());
}

#[test]
fn test_workers_drain_dependency_chain() {
    let tmp = tempdir().unwrap();
    let config = AppConfig::rooted_at(tmp.path());
    let q = JobQueue::from_config(&config).unwrap();

    let parent = NewJob::new(exif(5));
    let child = NewJob::new(thumbnail(5)).depends_on(parent.id.clone());
    q.add_bulk(vec![parent, child]).unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let thumbs = JobWorker::new(JobQueue::from_config(&config).unwrap(), QUEUE_THUMBNAIL, {
        let seen = Arc::clone(&seen);
        move |_job: &Job| -> archiver_core::error::Result<()> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    assert_eq!(thumbs.drain().unwrap(), 0, "thumbnail waits on exiftool");

    let exif_worker = JobWorker::new(
        JobQueue::from_config(&config).unwrap(),
        QUEUE_EXIFTOOL,
        |job: &Job| -> archiver_core::error::Result<()> {
            match &job.payload {
                JobPayload::Exiftool { .. } => Ok(()),
                other => Err(Error::Other(format!("unexpected payload {:?}", other))),
            }
        },
    );
    assert_eq!(exif_worker.drain().unwrap(), 1);
    assert_eq!(thumbs.drain().unwrap(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(q.get_queue_stats(QUEUE_THUMBNAIL).unwrap().done, 1);
}

#[test]
fn test_failing_handler_reports_outcome() {
    let tmp = tempdir().unwrap();
    let config = AppConfig::rooted_at(tmp.path());
    let q = JobQueue::from_config(&config).unwrap();
    let id = q.add_job(NewJob::new(exif(8)).with_max_attempts(1)).unwrap();

    let worker = JobWorker::new(
        JobQueue::from_config(&config).unwrap(),
        QUEUE_EXIFTOOL,
        |_job: &Job| -> archiver_core::error::Result<()> {
            Err(Error::Other("exiftool not installed".into()))
        },
    );
    match worker.run_once().unwrap() {
        Some(JobRun::Failed(job_id, FailOutcome::DeadLettered { attempts })) => {
            assert_eq!(job_id, id);
            assert_eq!(attempts, 1);
        }
        other => panic!("expected a dead-lettered run, got {:?}", other),
    }
    assert!(worker.run_once().unwrap().is_none());
}
