use super::payload::JobPayload;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "active" => Ok(JobStatus::Active),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A job row. Times are Unix milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub priority: i64,
    pub status: JobStatus,
    pub payload: JobPayload,
    pub depends_on: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub locked_by: Option<String>,
    pub locked_at: Option<i64>,
    pub retry_after: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// A job to enqueue. The id is assigned up front so jobs in one bulk insert
/// can depend on each other.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub queue: String,
    pub priority: i64,
    pub payload: JobPayload,
    pub depends_on: Option<String>,
    /// Falls back to the queue's configured default when unset.
    pub max_attempts: Option<u32>,
}

impl NewJob {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: payload.queue_name().to_string(),
            priority: payload.default_priority(),
            payload,
            depends_on: None,
            max_attempts: None,
        }
    }

    pub fn depends_on(mut self, job_id: impl Into<String>) -> Self {
        self.depends_on = Some(job_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub id: i64,
    pub job_id: String,
    pub queue: String,
    pub payload: JobPayload,
    pub error: Option<String>,
    pub attempts: u32,
    pub failed_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub active: u64,
    pub done: u64,
    pub failed: u64,
}

/// What `fail` did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending, claimable once `retry_after` (Unix ms) has passed.
    Retrying { attempts: u32, retry_after: i64 },
    DeadLettered { attempts: u32 },
    /// The job was not active, or no longer exists.
    Ignored,
}
