//! Drives import sessions through scan → hash → copy → validate → finalize.
//!
//! The session row is saved before every stage starts, so a session that
//! dies mid-stage resumes at the start of that stage from the results of the
//! stages before it. Every stage is safe to run twice: the scanner is
//! deterministic, hashing is pure, the copier skips verified destinations,
//! and the finalizer commits atomically.

use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::ingest::copier::{Copier, CopyTarget};
use crate::ingest::finalizer::{FinalizeOutcome, Finalizer};
use crate::ingest::hash_stage::HashStage;
use crate::ingest::types::{FileError, HashResult, ValidationResult};
use crate::ingest::validator::{ValidationTarget, Validator};
use crate::ingest::{FileProgress, ImportRequest};
use crate::pool::WorkerPool;
use crate::progress::{CompletionEvent, ProgressEvent, ProgressReporter};
use crate::scanner::{self, ScanOptions};
use crate::storage::{Database, ImportSession, ImportStatus, SessionCounts, TOTAL_STAGES};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Share of overall progress per stage, in pipeline order.
const STAGE_WEIGHTS: [(ImportStatus, f64); 5] = [
    (ImportStatus::Scanning, 10.0),
    (ImportStatus::Hashing, 35.0),
    (ImportStatus::Copying, 30.0),
    (ImportStatus::Validating, 15.0),
    (ImportStatus::Finalizing, 10.0),
];

fn overall_percent(stage: ImportStatus, fraction: f64) -> f64 {
    let mut done = 0.0;
    for (s, weight) in STAGE_WEIGHTS {
        if s == stage {
            return done + weight * fraction.clamp(0.0, 1.0);
        }
        done += weight;
    }
    100.0
}

/// Turns per-file stage callbacks into weighted [`ProgressEvent`]s. The
/// reported percent never drops below the highest value already emitted.
struct ProgressContext<'a> {
    reporter: &'a dyn ProgressReporter,
    session_id: String,
    started: Instant,
    high_water: Mutex<f64>,
}

impl ProgressContext<'_> {
    fn emit(
        &self,
        stage: ImportStatus,
        processed: (u64, u64),
        bytes: (u64, u64),
        counts: &SessionCounts,
        current_file: Option<&Path>,
    ) {
        let fraction = if processed.1 == 0 {
            0.0
        } else {
            processed.0 as f64 / processed.1 as f64
        };
        let percent = {
            let mut high = self.high_water.lock().unwrap();
            *high = high.max(overall_percent(stage, fraction));
            *high
        };
        let elapsed_ms = self.started.elapsed().as_millis() as f64;
        let estimated_remaining_ms =
            (percent > 0.0).then(|| (elapsed_ms * (100.0 - percent) / percent) as u64);

        self.reporter.on_progress(&ProgressEvent {
            session_id: self.session_id.clone(),
            stage,
            stage_index: stage.stage_index(),
            total_stages: TOTAL_STAGES,
            percent,
            current_file: current_file.map(|p| p.display().to_string()),
            files_processed: processed.0,
            files_total: processed.1,
            bytes_processed: bytes.0,
            bytes_total: bytes.1,
            duplicates_found: counts.duplicates,
            errors_found: counts.errors,
            estimated_remaining_ms,
        });
    }

    /// Stage boundary event, emitted before any file of the stage is touched.
    fn stage_started(&self, stage: ImportStatus, session: &ImportSession) {
        let c = &session.counts;
        self.emit(stage, (0, 0), (0, c.bytes_total), c, None);
    }
}

/// Accumulates per-file progress for one stage run.
struct StageTally<'c, 'r> {
    ctx: &'c ProgressContext<'r>,
    stage: ImportStatus,
    counts: SessionCounts,
    bytes_total: u64,
    failed: u64,
}

impl StageTally<'_, '_> {
    fn tick(&mut self, progress: &FileProgress<'_>) {
        self.counts.files_processed = progress.completed as u64;
        self.counts.bytes_processed += progress.bytes;
        if progress.failed {
            self.failed += 1;
        }
        let mut counts = self.counts.clone();
        counts.errors += self.failed;
        self.ctx.emit(
            self.stage,
            (progress.completed as u64, progress.total as u64),
            (self.counts.bytes_processed, self.bytes_total),
            &counts,
            Some(progress.path),
        );
    }
}

/// Entry in the running-session registry, removed on drop so a session
/// thread that unwinds does not leave its id behind.
struct Registration<'a> {
    running: &'a Mutex<HashMap<String, CancelToken>>,
    session_id: &'a str,
}

impl<'a> Registration<'a> {
    fn new(
        running: &'a Mutex<HashMap<String, CancelToken>>,
        session_id: &'a str,
        cancel: &CancelToken,
    ) -> Self {
        running
            .lock()
            .unwrap()
            .insert(session_id.to_string(), cancel.clone());
        Self {
            running,
            session_id,
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.remove(self.session_id);
    }
}

/// A session running on a background thread.
pub struct SessionHandle {
    session_id: String,
    thread: JoinHandle<Result<CompletionEvent>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<CompletionEvent> {
        self.thread
            .join()
            .map_err(|_| Error::Other(format!("import thread for {} panicked", self.session_id)))?
    }
}

/// Runs import sessions. Sessions in one process share the worker pool;
/// each opens its own database connection.
pub struct Importer {
    config: AppConfig,
    pool: Arc<WorkerPool>,
    reporter: Arc<dyn ProgressReporter>,
    running: Mutex<HashMap<String, CancelToken>>,
}

impl Importer {
    pub fn new(
        config: AppConfig,
        pool: Arc<WorkerPool>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            config,
            pool,
            reporter,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn open_db(&self) -> Result<Database> {
        Ok(Database::open(&self.config.database_path)?)
    }

    /// Validate a request and persist a fresh session for it.
    pub fn create_session(&self, request: &ImportRequest) -> Result<ImportSession> {
        if request.source_paths.is_empty() {
            return Err(Error::InvalidState("no source paths given".to_string()));
        }
        if request.location_id.trim().is_empty() {
            return Err(Error::InvalidState("location id is empty".to_string()));
        }
        let session = ImportSession::new(
            &request.location_id,
            request.source_paths.clone(),
            request.options.clone(),
        );
        self.open_db()?.create_session(&session)?;
        info!(
            "Import session {} created for {} source paths into {}",
            session.id,
            request.source_paths.len(),
            request.location_id
        );
        Ok(session)
    }

    /// Create a session and run it on a background thread. Returns as soon as
    /// the session row exists.
    pub fn start(self: &Arc<Self>, request: ImportRequest) -> Result<SessionHandle> {
        let session = self.create_session(&request)?;
        self.spawn(session.id)
    }

    /// Resume an interrupted session on a background thread.
    pub fn resume_in_background(self: &Arc<Self>, session_id: &str) -> Result<SessionHandle> {
        self.ensure_resumable(session_id)?;
        self.spawn(session_id.to_string())
    }

    fn spawn(self: &Arc<Self>, session_id: String) -> Result<SessionHandle> {
        let cancel = CancelToken::new();
        self.running
            .lock()
            .unwrap()
            .insert(session_id.clone(), cancel.clone());

        let importer = Arc::clone(self);
        let id = session_id.clone();
        let spawned = thread::Builder::new()
            .name(format!("archiver-import-{}", &session_id[..8.min(session_id.len())]))
            .spawn(move || importer.execute(&id, cancel));
        match spawned {
            Ok(thread) => Ok(SessionHandle { session_id, thread }),
            Err(e) => {
                self.running.lock().unwrap().remove(&session_id);
                Err(Error::Io(e))
            }
        }
    }

    /// Create and run a session on the calling thread.
    pub fn run(&self, request: ImportRequest) -> Result<CompletionEvent> {
        self.run_with_cancel(request, CancelToken::new())
    }

    pub fn run_with_cancel(
        &self,
        request: ImportRequest,
        cancel: CancelToken,
    ) -> Result<CompletionEvent> {
        let session = self.create_session(&request)?;
        self.execute(&session.id, cancel)
    }

    /// Resume an interrupted session on the calling thread.
    pub fn resume(&self, session_id: &str) -> Result<CompletionEvent> {
        self.ensure_resumable(session_id)?;
        self.execute(session_id, CancelToken::new())
    }

    fn ensure_resumable(&self, session_id: &str) -> Result<()> {
        match self.open_db()?.session_status(session_id)? {
            None => Err(Error::NotFound(format!("import session {}", session_id))),
            Some(status) if status.is_terminal() => Err(Error::InvalidState(format!(
                "session {} is already {}",
                session_id, status
            ))),
            Some(_) => {
                if self.running.lock().unwrap().contains_key(session_id) {
                    return Err(Error::InvalidState(format!(
                        "session {} is already running",
                        session_id
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn list_resumable(&self) -> Result<Vec<ImportSession>> {
        self.open_db()?.list_resumable()
    }

    /// Cancel a session. A session running in this process stops at the
    /// next file; one running elsewhere stops at its next stage boundary.
    /// Returns false when the session is unknown or already finished.
    pub fn cancel(&self, session_id: &str) -> Result<bool> {
        let local = match self.running.lock().unwrap().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        let marked = self.open_db()?.mark_session_cancelled(session_id)?;
        if local || marked {
            info!("Cancellation requested for session {}", session_id);
        }
        Ok(local || marked)
    }

    /// Run a persisted session to a terminal state (or back to a resumable
    /// one if finalization fails). Session-level failures are reported in
    /// the completion event; `Err` means the session could not be run at all.
    pub fn execute(&self, session_id: &str, cancel: CancelToken) -> Result<CompletionEvent> {
        let registration = Registration::new(&self.running, session_id, &cancel);
        let result = self.execute_registered(session_id, &cancel);
        drop(registration);

        let event = result?;
        self.reporter.on_complete(&event);
        Ok(event)
    }

    fn execute_registered(&self, session_id: &str, cancel: &CancelToken) -> Result<CompletionEvent> {
        let db = self.open_db()?;
        let mut session = db
            .load_session(session_id)?
            .ok_or_else(|| Error::NotFound(format!("import session {}", session_id)))?;
        if session.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "session {} is already {}",
                session_id, session.status
            )));
        }

        let ctx = ProgressContext {
            reporter: self.reporter.as_ref(),
            session_id: session.id.clone(),
            started: Instant::now(),
            high_water: Mutex::new(0.0),
        };
        info!(
            "Running session {} from stage {} ({})",
            session.id,
            session.stage_index(),
            session.status
        );

        let outcome = self.drive(&db, &mut session, cancel, &ctx);
        Ok(self.conclude(&db, &mut session, outcome))
    }

    fn drive(
        &self,
        db: &Database,
        session: &mut ImportSession,
        cancel: &CancelToken,
        ctx: &ProgressContext<'_>,
    ) -> Result<FinalizeOutcome> {
        loop {
            cancel.check()?;
            if db.session_status(&session.id)? == Some(ImportStatus::Cancelled) {
                info!("Session {} was cancelled externally", session.id);
                return Err(Error::Cancelled);
            }

            db.save_session(session)?;
            let stage = session.status;
            debug!("Session {} entering {}", session.id, stage);
            ctx.stage_started(stage, session);

            match stage {
                ImportStatus::Scanning => self.scan_stage(session, cancel, ctx)?,
                ImportStatus::Hashing => self.hash_stage(db, session, cancel, ctx)?,
                ImportStatus::Copying => self.copy_stage(session, cancel, ctx)?,
                ImportStatus::Validating => self.validate_stage(session, cancel, ctx)?,
                ImportStatus::Finalizing => {
                    let finalizer = Finalizer {
                        db,
                        default_max_attempts: self.config.job_max_attempts,
                    };
                    let outcome = finalizer.run(session)?;
                    let c = &session.counts;
                    ctx.emit(stage, (1, 1), (c.bytes_total, c.bytes_total), c, None);
                    return Ok(outcome);
                }
                other => {
                    return Err(Error::InvalidState(format!(
                        "session {} cannot run from {}",
                        session.id, other
                    )))
                }
            }

            session.status = stage.next().unwrap_or(ImportStatus::Completed);
        }
    }

    fn scan_stage(
        &self,
        session: &mut ImportSession,
        cancel: &CancelToken,
        ctx: &ProgressContext<'_>,
    ) -> Result<()> {
        let mut ignore_patterns = self.config.ignore_patterns.clone();
        ignore_patterns.extend(session.options.ignore_patterns.iter().cloned());
        let options = ScanOptions {
            ignore_patterns,
            pair_window: Duration::from_secs(self.config.pair_window_secs),
        };

        let counts = session.counts.clone();
        let on_file = |found: usize, path: &Path| {
            ctx.emit(
                ImportStatus::Scanning,
                (found as u64, 0),
                (0, 0),
                &counts,
                Some(path),
            );
        };
        let result = scanner::scan(&session.source_paths, &options, cancel, &on_file)
            .map_err(|e| fatal("scanning", e))?;

        for dir in &result.skipped_dirs {
            warn!("Session {}: skipped unreadable {}", session.id, dir.display());
        }
        session.counts = SessionCounts {
            files_total: result.files.len() as u64,
            files_processed: result.files.len() as u64,
            bytes_total: result.total_bytes,
            ..SessionCounts::default()
        };
        session.scan_result = Some(result);
        Ok(())
    }

    fn hash_stage(
        &self,
        db: &Database,
        session: &mut ImportSession,
        cancel: &CancelToken,
        ctx: &ProgressContext<'_>,
    ) -> Result<()> {
        let scan = session
            .scan_result
            .as_ref()
            .ok_or_else(|| missing(&session.id, "scan"))?;
        let stage = HashStage {
            pool: &self.pool,
            db,
            chunk_bytes: self.config.chunk_bytes(),
            transient_retries: self.config.transient_retries,
            lookup_batch_size: self.config.lookup_batch_size,
        };
        let mut tally = StageTally {
            ctx,
            stage: ImportStatus::Hashing,
            counts: SessionCounts {
                bytes_processed: 0,
                ..session.counts.clone()
            },
            bytes_total: scan.total_bytes,
            failed: 0,
        };
        let results = stage
            .run(scan, cancel, &mut |p| tally.tick(p))
            .map_err(|e| fatal("hashing", e))?;

        session.counts.files_processed = results.len() as u64;
        session.counts.bytes_processed = scan.total_bytes;
        session.counts.duplicates = results.iter().filter(|r| r.is_duplicate).count() as u64;
        session.hash_results = Some(results);
        session.counts.errors = file_errors(session).len() as u64;
        Ok(())
    }

    fn copier<'a>(&'a self, session: &'a ImportSession) -> Copier<'a> {
        Copier {
            archive_root: &self.config.archive_root,
            location_id: &session.location_id,
            options: &session.options,
            chunk_bytes: self.config.chunk_bytes(),
            transient_retries: self.config.transient_retries,
        }
    }

    fn copy_stage(
        &self,
        session: &mut ImportSession,
        cancel: &CancelToken,
        ctx: &ProgressContext<'_>,
    ) -> Result<()> {
        let scan = session
            .scan_result
            .as_ref()
            .ok_or_else(|| missing(&session.id, "scan"))?;
        let hashes = session
            .hash_results
            .as_ref()
            .ok_or_else(|| missing(&session.id, "hash"))?;

        let targets = copy_targets(hashes, None);
        let bytes_total = targets.iter().map(|t| scan.files[t.file_index].size).sum();
        let mut tally = StageTally {
            ctx,
            stage: ImportStatus::Copying,
            counts: SessionCounts {
                files_processed: 0,
                bytes_processed: 0,
                ..session.counts.clone()
            },
            bytes_total,
            failed: 0,
        };
        let results = self
            .copier(session)
            .run(scan, &targets, cancel, &mut |p| tally.tick(p))
            .map_err(|e| fatal("copying", e))?;

        session.counts.files_processed = results.len() as u64;
        session.counts.bytes_processed = bytes_total;
        session.copy_results = Some(results);
        session.counts.errors = file_errors(session).len() as u64;
        Ok(())
    }

    fn validate_stage(
        &self,
        session: &mut ImportSession,
        cancel: &CancelToken,
        ctx: &ProgressContext<'_>,
    ) -> Result<()> {
        let validator = Validator {
            pool: &self.pool,
            chunk_bytes: self.config.chunk_bytes(),
        };

        let targets = validation_targets(session, None)?;
        let bytes_total = targets.iter().map(|t| t.size).sum();
        let mut tally = StageTally {
            ctx,
            stage: ImportStatus::Validating,
            counts: SessionCounts {
                files_processed: 0,
                bytes_processed: 0,
                ..session.counts.clone()
            },
            bytes_total,
            failed: 0,
        };
        let mut validations = validator
            .run(&targets, cancel, &mut |p| tally.tick(p))
            .map_err(|e| fatal("validating", e))?;

        for retry in 1..=self.config.validation_retries {
            let invalid: Vec<usize> = validations
                .iter()
                .filter(|v| !v.valid)
                .map(|v| v.file_index)
                .collect();
            if invalid.is_empty() {
                break;
            }
            warn!(
                "Session {}: re-copying {} files that failed validation (retry {})",
                session.id,
                invalid.len(),
                retry
            );

            let recopied = {
                let scan = session
                    .scan_result
                    .as_ref()
                    .ok_or_else(|| missing(&session.id, "scan"))?;
                let hashes = session
                    .hash_results
                    .as_ref()
                    .ok_or_else(|| missing(&session.id, "hash"))?;
                let targets = copy_targets(hashes, Some(invalid.as_slice()));
                let mut tally = StageTally {
                    ctx,
                    stage: ImportStatus::Validating,
                    counts: SessionCounts {
                        files_processed: 0,
                        bytes_processed: 0,
                        ..session.counts.clone()
                    },
                    bytes_total: targets.iter().map(|t| scan.files[t.file_index].size).sum(),
                    failed: 0,
                };
                self.copier(session)
                    .run(scan, &targets, cancel, &mut |p| tally.tick(p))
                    .map_err(|e| fatal("validating", e))?
            };
            if let Some(copies) = session.copy_results.as_mut() {
                for copy in recopied {
                    if let Some(slot) = copies.iter_mut().find(|c| c.file_index == copy.file_index) {
                        *slot = copy;
                    }
                }
            }

            let retargets = validation_targets(session, Some(invalid.as_slice()))?;
            let mut tally = StageTally {
                ctx,
                stage: ImportStatus::Validating,
                counts: SessionCounts {
                    files_processed: 0,
                    bytes_processed: 0,
                    ..session.counts.clone()
                },
                bytes_total: retargets.iter().map(|t| t.size).sum(),
                failed: 0,
            };
            ctx.emit(
                ImportStatus::Validating,
                (0, retargets.len() as u64),
                (0, tally.bytes_total),
                &tally.counts,
                None,
            );
            let revalidated = validator
                .run(&retargets, cancel, &mut |p| tally.tick(p))
                .map_err(|e| fatal("validating", e))?;
            let mut by_index: HashMap<usize, ValidationResult> = revalidated
                .into_iter()
                .map(|v| (v.file_index, v))
                .collect();
            for validation in validations.iter_mut() {
                if let Some(updated) = by_index.remove(&validation.file_index) {
                    *validation = updated;
                } else if invalid.contains(&validation.file_index) {
                    validation.error = Some("re-copy failed".to_string());
                }
            }
        }

        session.counts.files_processed = validations.len() as u64;
        session.counts.bytes_processed = bytes_total;
        session.validation_results = Some(validations);
        session.counts.errors = file_errors(session).len() as u64;
        Ok(())
    }

    /// Settle the session's final state and build the completion event.
    fn conclude(
        &self,
        db: &Database,
        session: &mut ImportSession,
        outcome: Result<FinalizeOutcome>,
    ) -> CompletionEvent {
        let (finalized, error) = match outcome {
            Ok(finalized) => (finalized, None),
            Err(Error::Cancelled) => {
                session.status = ImportStatus::Cancelled;
                session.completed_at = Some(chrono::Utc::now().to_rfc3339());
                session.error_message = Some("cancelled".to_string());
                (FinalizeOutcome::default(), Some("import cancelled".to_string()))
            }
            Err(err) => {
                let message = err.to_string();
                if session.status == ImportStatus::Finalizing {
                    // stays resumable: only finalization needs to run again
                    error!("Session {} could not be finalized: {}", session.id, message);
                } else {
                    error!("Session {} failed: {}", session.id, message);
                    session.status = ImportStatus::Failed;
                    session.completed_at = Some(chrono::Utc::now().to_rfc3339());
                }
                session.error_message = Some(message.clone());
                (FinalizeOutcome::default(), Some(message))
            }
        };

        if session.status != ImportStatus::Completed {
            if let Err(err) = db.save_session(session) {
                if matches!(err, Error::Cancelled) {
                    session.status = ImportStatus::Cancelled;
                } else {
                    error!("Could not persist final state of {}: {}", session.id, err);
                }
            }
        }

        let file_errors = file_errors(session);
        let event = CompletionEvent {
            session_id: session.id.clone(),
            status: Some(session.status),
            imported: finalized.imported,
            duplicates: session.counts.duplicates,
            failed: file_errors.len() as u64,
            jobs_queued_by_type: finalized.jobs_queued_by_type,
            file_errors,
            error,
        };
        info!(
            "Session {} {}: {} imported, {} duplicates, {} failed",
            event.session_id, session.status, event.imported, event.duplicates, event.failed
        );
        event
    }
}

fn fatal(stage: &'static str, err: Error) -> Error {
    match err {
        Error::Cancelled | Error::StageFatal { .. } => err,
        other => Error::StageFatal {
            stage,
            message: other.to_string(),
        },
    }
}

fn missing(session_id: &str, what: &str) -> Error {
    Error::InvalidState(format!("session {} has no {} results", session_id, what))
}

/// New, successfully hashed files, optionally restricted to `only`.
fn copy_targets(hashes: &[HashResult], only: Option<&[usize]>) -> Vec<CopyTarget> {
    hashes
        .iter()
        .filter(|h| !h.is_duplicate)
        .filter(|h| only.map_or(true, |only| only.contains(&h.file_index)))
        .filter_map(|h| {
            h.fingerprint.clone().map(|fingerprint| CopyTarget {
                file_index: h.file_index,
                fingerprint,
            })
        })
        .collect()
}

fn validation_targets(
    session: &ImportSession,
    only: Option<&[usize]>,
) -> Result<Vec<ValidationTarget>> {
    let scan = session
        .scan_result
        .as_ref()
        .ok_or_else(|| missing(&session.id, "scan"))?;
    let hashes = session
        .hash_results
        .as_ref()
        .ok_or_else(|| missing(&session.id, "hash"))?;
    let copies = session
        .copy_results
        .as_ref()
        .ok_or_else(|| missing(&session.id, "copy"))?;

    let expected: HashMap<usize, _> = hashes
        .iter()
        .filter_map(|h| h.fingerprint.as_ref().map(|fp| (h.file_index, fp)))
        .collect();
    Ok(copies
        .iter()
        .filter(|c| c.success)
        .filter(|c| only.map_or(true, |only| only.contains(&c.file_index)))
        .filter_map(|c| {
            expected.get(&c.file_index).map(|fp| {
                ValidationTarget::from_copy(c, (*fp).clone(), scan.files[c.file_index].size)
            })
        })
        .collect())
}

/// Every file that will not be cataloged because of an error, attributed to
/// the last stage that touched it.
pub fn file_errors(session: &ImportSession) -> Vec<FileError> {
    let Some(scan) = session.scan_result.as_ref() else {
        return Vec::new();
    };
    let path_of = |index: usize| {
        scan.files
            .get(index)
            .map(|f| f.path.clone())
            .unwrap_or_default()
    };

    let mut errors: BTreeMap<usize, FileError> = BTreeMap::new();
    for hash in session.hash_results.iter().flatten() {
        if let Some(message) = &hash.error {
            errors.insert(
                hash.file_index,
                FileError {
                    path: path_of(hash.file_index),
                    stage: ImportStatus::Hashing.to_string(),
                    message: message.clone(),
                },
            );
        }
    }
    for copy in session.copy_results.iter().flatten() {
        if !copy.success {
            errors.insert(
                copy.file_index,
                FileError {
                    path: path_of(copy.file_index),
                    stage: ImportStatus::Copying.to_string(),
                    message: copy.error.clone().unwrap_or_default(),
                },
            );
        }
    }
    for validation in session.validation_results.iter().flatten() {
        if !validation.valid {
            errors.insert(
                validation.file_index,
                FileError {
                    path: path_of(validation.file_index),
                    stage: ImportStatus::Validating.to_string(),
                    message: validation.error.clone().unwrap_or_default(),
                },
            );
        }
    }
    errors.into_values().collect()
}
