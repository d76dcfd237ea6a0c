use crate::ingest::types::FileError;
use crate::storage::ImportStatus;
use serde::Serialize;
use std::collections::BTreeMap;

/// Snapshot of a running session, emitted as files move through a stage.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub stage: ImportStatus,
    pub stage_index: u8,
    pub total_stages: u8,
    /// Overall percentage across all stages, weighted by stage cost.
    pub percent: f64,
    pub current_file: Option<String>,
    pub files_processed: u64,
    pub files_total: u64,
    pub bytes_processed: u64,
    pub bytes_total: u64,
    pub duplicates_found: u64,
    pub errors_found: u64,
    pub estimated_remaining_ms: Option<u64>,
}

/// Final outcome of a session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletionEvent {
    pub session_id: String,
    pub status: Option<ImportStatus>,
    pub imported: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub jobs_queued_by_type: BTreeMap<String, u64>,
    pub file_errors: Vec<FileError>,
    /// Set when the session ended in `failed` or `cancelled`.
    pub error: Option<String>,
}

/// Receives session progress.
///
/// CLI implements with indicatif. One reporter may serve several sessions
/// running on their own threads. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_complete(&self, _event: &CompletionEvent) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
