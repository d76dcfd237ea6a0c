//! Durable job queue stored next to the catalog.
//!
//! Jobs are claimed per queue in priority order, retried with quadratic
//! backoff and moved to the dead-letter table when out of attempts. A job
//! naming a dependency stays unclaimable until that dependency is done.

pub mod job;
pub mod payload;
pub mod store;
pub mod worker;

pub use job::{DeadLetterEntry, FailOutcome, Job, JobStatus, NewJob, QueueStats};
pub use payload::JobPayload;
pub use worker::{JobHandler, JobWorker};

use crate::config::AppConfig;
use crate::error::Result;
use crate::storage::Database;
use rusqlite::{Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Queue handle over its own SQLite connection. Open one per thread.
pub struct JobQueue {
    db: Database,
    lock_timeout: Duration,
    default_max_attempts: u32,
}

impl JobQueue {
    pub fn new(db: Database, lock_timeout: Duration, default_max_attempts: u32) -> Self {
        Self {
            db,
            lock_timeout,
            default_max_attempts: default_max_attempts.max(1),
        }
    }

    pub fn open(path: impl AsRef<Path>, config: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            Database::open(path)?,
            config.lock_timeout(),
            config.job_max_attempts,
        ))
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::open(&config.database_path, config)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn default_max_attempts(&self) -> u32 {
        self.default_max_attempts
    }

    pub fn add_job(&self, job: NewJob) -> Result<String> {
        store::insert_job(self.db.connection(), &job, self.default_max_attempts)?;
        debug!("Queued job {} on {}", job.id, job.queue);
        Ok(job.id)
    }

    /// Insert every job or none of them.
    pub fn add_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<String>> {
        let tx = Transaction::new_unchecked(self.db.connection(), TransactionBehavior::Immediate)?;
        for job in &jobs {
            store::insert_job(&tx, job, self.default_max_attempts)?;
        }
        tx.commit()?;
        debug!("Queued {} jobs", jobs.len());
        Ok(jobs.into_iter().map(|j| j.id).collect())
    }

    pub fn claim_next(&self, queue: &str, worker_id: &str) -> Result<Option<Job>> {
        Ok(store::claim_next(
            self.db.connection(),
            queue,
            worker_id,
            self.lock_timeout,
        )?)
    }

    /// Only the worker currently holding the lock can complete a job.
    pub fn complete(&self, job_id: &str, worker_id: &str) -> Result<bool> {
        Ok(store::complete(self.db.connection(), job_id, worker_id)?)
    }

    pub fn fail(&self, job_id: &str, worker_id: &str, error: &str) -> Result<FailOutcome> {
        Ok(store::fail(self.db.connection(), job_id, worker_id, error)?)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(store::get_job(self.db.connection(), job_id)?)
    }

    pub fn get_queue_stats(&self, queue: &str) -> Result<QueueStats> {
        Ok(store::queue_stats(self.db.connection(), queue)?)
    }

    pub fn list_dead_letter(&self, queue: &str) -> Result<Vec<DeadLetterEntry>> {
        Ok(store::list_dead_letter(self.db.connection(), queue)?)
    }

    pub fn retry_dead_letter(&self, entry_id: i64) -> Result<bool> {
        Ok(store::retry_dead_letter(
            self.db.connection(),
            entry_id,
            self.default_max_attempts,
        )?)
    }

    pub fn acknowledge_dead_letter(&self, entry_ids: &[i64]) -> Result<usize> {
        Ok(store::acknowledge_dead_letter(self.db.connection(), entry_ids)?)
    }

    pub fn purge_completed(&self, older_than: Duration) -> Result<usize> {
        let purged = store::purge_completed(self.db.connection(), older_than)?;
        debug!("Purged {} completed jobs", purged);
        Ok(purged)
    }
}
