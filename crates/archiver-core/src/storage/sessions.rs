use super::models::{ImportSession, ImportStatus, SessionCounts};
use super::sqlite::Database;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

const SESSION_COLUMNS: &str = "id, location_id, status, source_paths, options, \
     files_total, files_processed, bytes_total, bytes_processed, duplicates, errors, \
     scan_result, hash_results, copy_results, validation_results, error_message, \
     started_at, updated_at, completed_at";

const NON_TERMINAL: &str = "('scanning', 'hashing', 'copying', 'validating', 'finalizing')";

fn to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(Error::from))
        .transpose()
}

fn from_json<T: DeserializeOwned>(text: Option<String>) -> Result<Option<T>> {
    text.map(|t| serde_json::from_str(&t).map_err(Error::from))
        .transpose()
}

/// Raw column values; JSON is decoded outside the rusqlite row closure.
struct SessionRow {
    id: String,
    location_id: String,
    status: String,
    source_paths: String,
    options: String,
    counts: SessionCounts,
    scan_result: Option<String>,
    hash_results: Option<String>,
    copy_results: Option<String>,
    validation_results: Option<String>,
    error_message: Option<String>,
    started_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl SessionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SessionRow {
            id: row.get(0)?,
            location_id: row.get(1)?,
            status: row.get(2)?,
            source_paths: row.get(3)?,
            options: row.get(4)?,
            counts: SessionCounts {
                files_total: row.get::<_, i64>(5)? as u64,
                files_processed: row.get::<_, i64>(6)? as u64,
                bytes_total: row.get::<_, i64>(7)? as u64,
                bytes_processed: row.get::<_, i64>(8)? as u64,
                duplicates: row.get::<_, i64>(9)? as u64,
                errors: row.get::<_, i64>(10)? as u64,
            },
            scan_result: row.get(11)?,
            hash_results: row.get(12)?,
            copy_results: row.get(13)?,
            validation_results: row.get(14)?,
            error_message: row.get(15)?,
            started_at: row.get(16)?,
            updated_at: row.get(17)?,
            completed_at: row.get(18)?,
        })
    }

    fn decode(self) -> Result<ImportSession> {
        let status: ImportStatus = self.status.parse().map_err(Error::InvalidState)?;
        Ok(ImportSession {
            id: self.id,
            location_id: self.location_id,
            status,
            source_paths: serde_json::from_str(&self.source_paths)?,
            options: serde_json::from_str(&self.options)?,
            counts: self.counts,
            scan_result: from_json(self.scan_result)?,
            hash_results: from_json(self.hash_results)?,
            copy_results: from_json(self.copy_results)?,
            validation_results: from_json(self.validation_results)?,
            error_message: self.error_message,
            started_at: self.started_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

impl Database {
    // ── Import Session ───────────────────────────────────────────

    pub fn create_session(&self, session: &ImportSession) -> Result<()> {
        self.connection().execute(
            "INSERT INTO import_session (id, location_id, status, stage_index, source_paths, \
             options, started_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id,
                session.location_id,
                session.status.as_str(),
                session.stage_index(),
                serde_json::to_string(&session.source_paths)?,
                serde_json::to_string(&session.options)?,
                session.started_at,
                session.updated_at,
            ],
        )?;
        debug!("Created import session {}", session.id);
        Ok(())
    }

    /// Write the whole session row in one statement. Refreshes `updated_at`.
    ///
    /// A row already marked `cancelled` (possibly by another process) is
    /// only overwritten with `cancelled`; any other write fails with
    /// [`Error::Cancelled`].
    pub fn save_session(&self, session: &mut ImportSession) -> Result<()> {
        session.updated_at = Utc::now().to_rfc3339();
        let counts = &session.counts;
        let changed = self.connection().execute(
            "UPDATE import_session SET status = ?2, stage_index = ?3, \
             files_total = ?4, files_processed = ?5, bytes_total = ?6, bytes_processed = ?7, \
             duplicates = ?8, errors = ?9, scan_result = ?10, hash_results = ?11, \
             copy_results = ?12, validation_results = ?13, error_message = ?14, \
             updated_at = ?15, completed_at = ?16 \
             WHERE id = ?1 AND (status != 'cancelled' OR ?2 = 'cancelled')",
            params![
                session.id,
                session.status.as_str(),
                session.stage_index(),
                counts.files_total as i64,
                counts.files_processed as i64,
                counts.bytes_total as i64,
                counts.bytes_processed as i64,
                counts.duplicates as i64,
                counts.errors as i64,
                to_json(&session.scan_result)?,
                to_json(&session.hash_results)?,
                to_json(&session.copy_results)?,
                to_json(&session.validation_results)?,
                session.error_message,
                session.updated_at,
                session.completed_at,
            ],
        )?;
        if changed == 0 {
            return match self.session_status(&session.id)? {
                Some(ImportStatus::Cancelled) => Err(Error::Cancelled),
                _ => Err(Error::NotFound(format!("import session {}", session.id))),
            };
        }
        Ok(())
    }

    pub fn load_session(&self, id: &str) -> Result<Option<ImportSession>> {
        let row = self
            .connection()
            .query_row(
                &format!("SELECT {} FROM import_session WHERE id = ?1", SESSION_COLUMNS),
                params![id],
                SessionRow::read,
            )
            .optional()?;
        row.map(SessionRow::decode).transpose()
    }

    /// Cheap status read used to notice a cancel issued by another process.
    pub fn session_status(&self, id: &str) -> Result<Option<ImportStatus>> {
        let status: Option<String> = self
            .connection()
            .query_row(
                "SELECT status FROM import_session WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        status
            .map(|s| s.parse().map_err(Error::InvalidState))
            .transpose()
    }

    /// Sessions that stopped before reaching a terminal state, oldest first.
    pub fn list_resumable(&self) -> Result<Vec<ImportSession>> {
        self.query_sessions(&format!(
            "SELECT {} FROM import_session WHERE status IN {} ORDER BY started_at",
            SESSION_COLUMNS, NON_TERMINAL
        ))
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<ImportSession>> {
        self.query_sessions(&format!(
            "SELECT {} FROM import_session ORDER BY started_at DESC LIMIT {}",
            SESSION_COLUMNS, limit
        ))
    }

    fn query_sessions(&self, sql: &str) -> Result<Vec<ImportSession>> {
        let mut stmt = self.connection().prepare(sql)?;
        let rows = stmt
            .query_map([], SessionRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(SessionRow::decode).collect()
    }

    /// Mark a non-terminal session cancelled. Returns false when the session
    /// is unknown or already finished.
    pub fn mark_session_cancelled(&self, id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self.connection().execute(
            &format!(
                "UPDATE import_session SET status = 'cancelled', updated_at = ?2, \
                 completed_at = ?2 WHERE id = ?1 AND status IN {}",
                NON_TERMINAL
            ),
            params![id, now],
        )?;
        Ok(changed > 0)
    }

    /// Delete terminal sessions that finished before `cutoff`.
    pub fn purge_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self.connection().execute(
            &format!(
                "DELETE FROM import_session WHERE status NOT IN {} \
                 AND completed_at IS NOT NULL AND completed_at < ?1",
                NON_TERMINAL
            ),
            params![cutoff.to_rfc3339()],
        )?;
        debug!("Purged {} finished import sessions", deleted);
        Ok(deleted)
    }
}
