use super::job::{FailOutcome, Job};
use super::JobQueue;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Processes one kind of job. The queue only schedules; what a job actually
/// does lives behind this trait.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job) -> Result<()>;
}

impl<F> JobHandler for F
where
    F: Fn(&Job) -> Result<()> + Send + Sync,
{
    fn handle(&self, job: &Job) -> Result<()> {
        self(job)
    }
}

/// Outcome of processing a single claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRun {
    Completed(String),
    Failed(String, FailOutcome),
}

/// Claims jobs from one queue and runs them through a handler.
pub struct JobWorker<H: JobHandler> {
    queue: JobQueue,
    queue_name: String,
    worker_id: String,
    handler: H,
    idle_wait: Duration,
}

impl<H: JobHandler> JobWorker<H> {
    pub fn new(queue: JobQueue, queue_name: &str, handler: H) -> Self {
        Self {
            queue,
            queue_name: queue_name.to_string(),
            worker_id: format!("{}-{}", queue_name, uuid::Uuid::new_v4()),
            handler,
            idle_wait: Duration::from_millis(500),
        }
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Claim and process at most one job. `None` when nothing is claimable.
    pub fn run_once(&self) -> Result<Option<JobRun>> {
        let Some(job) = self.queue.claim_next(&self.queue_name, &self.worker_id)? else {
            return Ok(None);
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(&job)))
            .unwrap_or_else(|_| Err(Error::Other("job handler panicked".to_string())));

        match outcome {
            Ok(()) => {
                if !self.queue.complete(&job.id, &self.worker_id)? {
                    warn!("Job {} was reclaimed before it finished", job.id);
                }
                debug!("Job {} completed", job.id);
                Ok(Some(JobRun::Completed(job.id)))
            }
            Err(err) => {
                let message = err.to_string();
                warn!("Job {} on {} failed: {}", job.id, self.queue_name, message);
                let fail = self.queue.fail(&job.id, &self.worker_id, &message)?;
                Ok(Some(JobRun::Failed(job.id, fail)))
            }
        }
    }

    /// Process jobs until `cancel` trips, sleeping `idle_wait` whenever the
    /// queue has nothing claimable. Returns the number of jobs processed.
    pub fn run(&self, cancel: &CancelToken) -> Result<usize> {
        info!("Worker {} polling {}", self.worker_id, self.queue_name);
        let mut processed = 0;
        while !cancel.is_cancelled() {
            match self.run_once()? {
                Some(_) => processed += 1,
                None => thread::sleep(self.idle_wait),
            }
        }
        info!("Worker {} stopped after {} jobs", self.worker_id, processed);
        Ok(processed)
    }

    /// Process jobs until none is claimable.
    pub fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.run_once()?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{payload, JobPayload, JobStatus, NewJob};
    use crate::storage::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue() -> JobQueue {
        JobQueue::new(Database::open_in_memory().unwrap(), Duration::from_secs(300), 1)
    }

    fn bagit() -> JobPayload {
        JobPayload::Bagit {
            session_id: "s".into(),
            location_id: "loc".into(),
            asset_count: 2,
        }
    }

    #[test]
    fn test_handler_success_completes_job() {
        let q = queue();
        let id = q.add_job(NewJob::new(bagit())).unwrap();
        let calls = AtomicUsize::new(0);
        let worker = JobWorker::new(q, payload::QUEUE_BAGIT, |_: &Job| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(worker.run_once().unwrap(), Some(JobRun::Completed(id.clone())));
        assert_eq!(worker.run_once().unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(worker.queue().get_job(&id).unwrap().unwrap().status, JobStatus::Done);
    }

    #[test]
    fn test_panicking_handler_fails_job() {
        let q = queue();
        let id = q.add_job(NewJob::new(bagit())).unwrap();
        let worker = JobWorker::new(q, payload::QUEUE_BAGIT, |_: &Job| -> Result<()> {
            panic!("manifest writer blew up")
        });

        let run = worker.run_once().unwrap().unwrap();
        assert_eq!(
            run,
            JobRun::Failed(id.clone(), FailOutcome::DeadLettered { attempts: 1 })
        );
        let dead = worker.queue().list_dead_letter(payload::QUEUE_BAGIT).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error.as_deref(), Some("job handler panicked"));
    }
}
