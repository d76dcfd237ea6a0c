//! SQL for the job and dead-letter tables. Everything takes a bare
//! `&Connection` so the finalizer can enqueue inside its own transaction.

use super::job::{DeadLetterEntry, FailOutcome, Job, NewJob, QueueStats};
use super::payload::JobPayload;
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, OptionalExtension, Result, Row, Transaction, TransactionBehavior,
};
use std::time::Duration;
use tracing::{debug, warn};

const JOB_COLUMNS: &str = "id, queue, priority, status, payload, depends_on, attempts, \
     max_attempts, locked_by, locked_at, retry_after, last_error, created_at, started_at, \
     completed_at";

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Backoff before the next attempt: `attempts²` seconds.
pub fn backoff(attempts: u32) -> Duration {
    Duration::from_secs(u64::from(attempts).pow(2))
}

fn decode_payload(index: usize, text: String) -> Result<JobPayload> {
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn encode_payload(payload: &JobPayload) -> Result<String> {
    serde_json::to_string(payload).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn read_job(row: &Row<'_>) -> Result<Job> {
    let status: String = row.get(3)?;
    Ok(Job {
        id: row.get(0)?,
        queue: row.get(1)?,
        priority: row.get(2)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
        })?,
        payload: decode_payload(4, row.get(4)?)?,
        depends_on: row.get(5)?,
        attempts: row.get(6)?,
        max_attempts: row.get(7)?,
        locked_by: row.get(8)?,
        locked_at: row.get(9)?,
        retry_after: row.get(10)?,
        last_error: row.get(11)?,
        created_at: row.get(12)?,
        started_at: row.get(13)?,
        completed_at: row.get(14)?,
    })
}

fn read_dead_letter(row: &Row<'_>) -> Result<DeadLetterEntry> {
    Ok(DeadLetterEntry {
        id: row.get(0)?,
        job_id: row.get(1)?,
        queue: row.get(2)?,
        payload: decode_payload(3, row.get(3)?)?,
        error: row.get(4)?,
        attempts: row.get(5)?,
        failed_at: row.get(6)?,
    })
}

pub fn insert_job(conn: &Connection, job: &NewJob, default_max_attempts: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO job (id, queue, priority, status, payload, depends_on, attempts, \
         max_attempts, created_at) VALUES (?1, ?2, ?3, 'pending', ?4, ?5, 0, ?6, ?7)",
        params![
            job.id,
            job.queue,
            job.priority,
            encode_payload(&job.payload)?,
            job.depends_on,
            job.max_attempts.unwrap_or(default_max_attempts).max(1),
            now_ms(),
        ],
    )?;
    Ok(())
}

/// Atomically take the best claimable job of `queue`.
///
/// Claimable means pending (or active with a lock older than
/// `lock_timeout`), past its retry time, and either without a dependency or
/// depending on a job that is `done` or no longer exists. Ties on priority
/// go to the oldest job. The whole selection is one `UPDATE`, so two
/// workers can never lock the same row.
pub fn claim_next(
    conn: &Connection,
    queue: &str,
    worker_id: &str,
    lock_timeout: Duration,
) -> Result<Option<Job>> {
    let now = now_ms();
    let stale_before = now - lock_timeout.as_millis() as i64;
    let sql = format!(
        "UPDATE job SET status = 'active', locked_by = ?2, locked_at = ?3, \
             started_at = COALESCE(started_at, ?3) \
         WHERE id = ( \
             SELECT j.id FROM job j \
             LEFT JOIN job dep ON dep.id = j.depends_on \
             WHERE j.queue = ?1 \
               AND (j.status = 'pending' OR (j.status = 'active' AND j.locked_at < ?4)) \
               AND (j.retry_after IS NULL OR j.retry_after <= ?3) \
               AND (j.depends_on IS NULL OR dep.id IS NULL OR dep.status = 'done') \
             ORDER BY j.priority ASC, j.created_at ASC, j.rowid ASC \
             LIMIT 1) \
         AND (status = 'pending' OR (status = 'active' AND locked_at < ?4)) \
         RETURNING {}",
        JOB_COLUMNS
    );
    let job = conn
        .query_row(&sql, params![queue, worker_id, now, stale_before], read_job)
        .optional()?;
    if let Some(job) = &job {
        debug!("Worker {} claimed job {} on {}", worker_id, job.id, queue);
    }
    Ok(job)
}

/// Mark an active job done. Returns false if it was not active or is now
/// held by another worker (the caller's lock expired and was reclaimed).
pub fn complete(conn: &Connection, job_id: &str, worker_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE job SET status = 'done', completed_at = ?3, locked_by = NULL, locked_at = NULL, \
         last_error = NULL WHERE id = ?1 AND status = 'active' AND locked_by = ?2",
        params![job_id, worker_id, now_ms()],
    )?;
    if changed == 0 {
        debug!("Ignoring completion of {} by {}: not its owner", job_id, worker_id);
    }
    Ok(changed == 1)
}

/// Record a failed attempt: schedule a retry with backoff, or move the job
/// to the dead-letter table once it has used all of its attempts. Reports
/// from a worker that no longer holds the lock are ignored.
pub fn fail(conn: &Connection, job_id: &str, worker_id: &str, error: &str) -> Result<FailOutcome> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let row: Option<(u32, u32, String, String)> = tx
        .query_row(
            "SELECT attempts, max_attempts, queue, payload FROM job \
             WHERE id = ?1 AND status = 'active' AND locked_by = ?2",
            params![job_id, worker_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let Some((attempts, max_attempts, queue, payload)) = row else {
        return Ok(FailOutcome::Ignored);
    };

    let attempts = attempts + 1;
    let now = now_ms();
    let outcome = if attempts < max_attempts {
        let retry_after = now + backoff(attempts).as_millis() as i64;
        tx.execute(
            "UPDATE job SET status = 'pending', attempts = ?2, retry_after = ?3, last_error = ?4, \
             locked_by = NULL, locked_at = NULL WHERE id = ?1",
            params![job_id, attempts, retry_after, error],
        )?;
        FailOutcome::Retrying {
            attempts,
            retry_after,
        }
    } else {
        tx.execute(
            "UPDATE job SET status = 'failed', attempts = ?2, last_error = ?3, completed_at = ?4, \
             locked_by = NULL, locked_at = NULL WHERE id = ?1",
            params![job_id, attempts, error, now],
        )?;
        tx.execute(
            "INSERT INTO dead_letter (job_id, queue, payload, error, attempts, failed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (job_id) DO UPDATE SET error = excluded.error, \
             attempts = excluded.attempts, failed_at = excluded.failed_at",
            params![job_id, queue, payload, error, attempts, now],
        )?;
        warn!("Job {} on {} dead-lettered after {} attempts: {}", job_id, queue, attempts, error);
        FailOutcome::DeadLettered { attempts }
    };
    tx.commit()?;
    Ok(outcome)
}

pub fn get_job(conn: &Connection, job_id: &str) -> Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {} FROM job WHERE id = ?1", JOB_COLUMNS),
        params![job_id],
        read_job,
    )
    .optional()
}

pub fn queue_stats(conn: &Connection, queue: &str) -> Result<QueueStats> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM job WHERE queue = ?1 GROUP BY status")?;
    let mut rows = stmt.query(params![queue])?;
    let mut stats = QueueStats::default();
    while let Some(row) = rows.next()? {
        let status: String = row.get(0)?;
        let count = row.get::<_, i64>(1)? as u64;
        match status.as_str() {
            "pending" => stats.pending = count,
            "active" => stats.active = count,
            "done" => stats.done = count,
            "failed" => stats.failed = count,
            _ => {}
        }
    }
    Ok(stats)
}

pub fn list_dead_letter(conn: &Connection, queue: &str) -> Result<Vec<DeadLetterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, job_id, queue, payload, error, attempts, failed_at FROM dead_letter \
         WHERE queue = ?1 ORDER BY failed_at, id",
    )?;
    let entries = stmt
        .query_map(params![queue], read_dead_letter)?
        .collect::<Result<Vec<_>>>()?;
    Ok(entries)
}

/// Give a dead-lettered job a fresh set of attempts. Returns false when the
/// entry does not exist.
pub fn retry_dead_letter(
    conn: &Connection,
    entry_id: i64,
    default_max_attempts: u32,
) -> Result<bool> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let entry = tx
        .query_row(
            "SELECT id, job_id, queue, payload, error, attempts, failed_at FROM dead_letter \
             WHERE id = ?1",
            params![entry_id],
            read_dead_letter,
        )
        .optional()?;
    let Some(entry) = entry else {
        return Ok(false);
    };

    let revived = tx.execute(
        "UPDATE job SET status = 'pending', attempts = 0, retry_after = NULL, completed_at = NULL, \
         locked_by = NULL, locked_at = NULL WHERE id = ?1",
        params![entry.job_id],
    )?;
    if revived == 0 {
        // job row is gone, rebuild it from the dead-letter copy
        let mut job = NewJob::new(entry.payload.clone());
        job.id = entry.job_id.clone();
        insert_job(&tx, &job, default_max_attempts)?;
    }
    tx.execute("DELETE FROM dead_letter WHERE id = ?1", params![entry_id])?;
    tx.commit()?;
    debug!("Dead-letter entry {} requeued as job {}", entry_id, entry.job_id);
    Ok(true)
}

/// Drop dead-letter entries and the failed jobs behind them. Jobs that
/// depended on an acknowledged job become claimable.
pub fn acknowledge_dead_letter(conn: &Connection, entry_ids: &[i64]) -> Result<usize> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut removed = 0;
    for id in entry_ids {
        let job_id: Option<String> = tx
            .query_row(
                "SELECT job_id FROM dead_letter WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(job_id) = job_id {
            tx.execute(
                "DELETE FROM job WHERE id = ?1 AND status = 'failed'",
                params![job_id],
            )?;
            removed += tx.execute("DELETE FROM dead_letter WHERE id = ?1", params![id])?;
        }
    }
    tx.commit()?;
    Ok(removed)
}

/// Delete `done` jobs that finished more than `older_than` ago.
pub fn purge_completed(conn: &Connection, older_than: Duration) -> Result<usize> {
    let cutoff = now_ms() - older_than.as_millis() as i64;
    conn.execute(
        "DELETE FROM job WHERE status = 'done' AND completed_at < ?1",
        params![cutoff],
    )
}
