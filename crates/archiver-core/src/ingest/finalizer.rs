use super::types::{CopyResult, FileRole, MediaKind, ValidationResult};
use crate::error::{Error, Result};
use crate::hasher::Fingerprint;
use crate::queue::{store as job_store, JobPayload, NewJob};
use crate::storage::{insert_asset, is_cataloged, Database, ImportSession, ImportStatus, NewAsset};
use rusqlite::{Transaction, TransactionBehavior};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub imported: u64,
    /// Validated files another session cataloged first.
    pub late_duplicates: u64,
    pub jobs_queued_by_type: BTreeMap<String, u64>,
}

/// Commits a session's validated files in one transaction: catalog rows,
/// follow-up jobs, and the session's `completed` status. Either all of it
/// lands or none of it does.
pub struct Finalizer<'a> {
    pub db: &'a Database,
    pub default_max_attempts: u32,
}

impl Finalizer<'_> {
    pub fn run(&self, session: &mut ImportSession) -> Result<FinalizeOutcome> {
        let (Some(scan), Some(hashes), Some(copies), Some(validations)) = (
            &session.scan_result,
            &session.hash_results,
            &session.copy_results,
            &session.validation_results,
        ) else {
            return Err(Error::InvalidState(format!(
                "session {} reached finalization without stage results",
                session.id
            )));
        };

        let fingerprints: HashMap<usize, &Fingerprint> = hashes
            .iter()
            .filter_map(|h| h.fingerprint.as_ref().map(|fp| (h.file_index, fp)))
            .collect();
        let destinations: HashMap<usize, &CopyResult> = copies
            .iter()
            .filter(|c| c.success)
            .map(|c| (c.file_index, c))
            .collect();
        let by_path: HashMap<&std::path::Path, usize> = scan
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.as_path(), i))
            .collect();

        // primaries first, so a member's link can be checked against the catalog
        let mut valid: Vec<&ValidationResult> = validations.iter().filter(|v| v.valid).collect();
        valid.sort_by_key(|v| (scan.files[v.file_index].role != FileRole::Primary, v.file_index));

        let tx = Transaction::new_unchecked(self.db.connection(), TransactionBehavior::Immediate)?;
        let mut outcome = FinalizeOutcome::default();
        let mut jobs = Vec::new();
        let mut last_exif: Option<String> = None;

        for validation in valid {
            let index = validation.file_index;
            let file = &scan.files[index];
            let Some(copy) = destinations.get(&index) else {
                continue;
            };
            let primary_fingerprint = match scan
                .primary_of(index)
                .and_then(|primary| by_path.get(primary.path.as_path()))
                .and_then(|primary_index| fingerprints.get(primary_index))
            {
                // a primary that failed copy or validation was never cataloged
                Some(fp) if is_cataloged(&tx, fp.as_str())? => Some(fp.as_str()),
                Some(fp) => {
                    debug!(
                        "{} links to uncataloged primary {}, left ungrouped",
                        file.path.display(),
                        fp
                    );
                    None
                }
                None => None,
            };

            let fingerprint = validation.source_fingerprint.as_str();
            let archive_path = copy.destination.to_string_lossy();
            let original_path = file.path.to_string_lossy();
            let original_name = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let inserted = insert_asset(
                &tx,
                &NewAsset {
                    fingerprint,
                    location_id: &session.location_id,
                    archive_path: &archive_path,
                    original_path: &original_path,
                    original_name: &original_name,
                    extension: &file.extension,
                    kind: file.kind.as_str(),
                    role: file.role.as_str(),
                    file_size: file.size as i64,
                    primary_fingerprint,
                    session_id: &session.id,
                },
            )?;
            if !inserted {
                debug!("{} was cataloged by another session", fingerprint);
                outcome.late_duplicates += 1;
                continue;
            }
            outcome.imported += 1;

            let exif = NewJob::new(JobPayload::Exiftool {
                fingerprint: fingerprint.to_string(),
                archive_path: archive_path.to_string(),
                kind: file.kind.as_str().to_string(),
            });
            let exif_id = exif.id.clone();
            jobs.push(exif);

            if file.kind.is_visual() {
                jobs.push(
                    NewJob::new(JobPayload::Thumbnail {
                        fingerprint: fingerprint.to_string(),
                        archive_path: archive_path.to_string(),
                        kind: file.kind.as_str().to_string(),
                    })
                    .depends_on(exif_id.clone()),
                );
            }
            if file.kind == MediaKind::Video {
                jobs.push(
                    NewJob::new(JobPayload::VideoProxy {
                        fingerprint: fingerprint.to_string(),
                        archive_path: archive_path.to_string(),
                    })
                    .depends_on(exif_id.clone()),
                );
            }
            last_exif = Some(exif_id);
        }

        if let Some(last_exif) = last_exif {
            let gps = NewJob::new(JobPayload::GpsEnrichment {
                session_id: session.id.clone(),
                location_id: session.location_id.clone(),
            })
            .depends_on(last_exif.clone());
            let stats = NewJob::new(JobPayload::LocationStats {
                session_id: session.id.clone(),
                location_id: session.location_id.clone(),
            })
            .depends_on(gps.id.clone());
            jobs.push(gps);
            jobs.push(stats);
            jobs.push(
                NewJob::new(JobPayload::Bagit {
                    session_id: session.id.clone(),
                    location_id: session.location_id.clone(),
                    asset_count: outcome.imported,
                })
                .depends_on(last_exif),
            );
        }

        for job in &jobs {
            job_store::insert_job(&tx, job, self.default_max_attempts)?;
            *outcome
                .jobs_queued_by_type
                .entry(job.queue.clone())
                .or_default() += 1;
        }

        session.status = ImportStatus::Completed;
        session.completed_at = Some(chrono::Utc::now().to_rfc3339());
        session.counts.duplicates += outcome.late_duplicates;
        session.error_message = None;
        // same connection, so the session row commits with the catalog rows
        let committed = self
            .db
            .save_session(session)
            .and_then(|()| tx.commit().map_err(Error::from));
        if let Err(err) = committed {
            session.status = ImportStatus::Finalizing;
            session.completed_at = None;
            session.counts.duplicates -= outcome.late_duplicates;
            return Err(err);
        }

        info!(
            "Session {} finalized: {} assets, {} jobs queued",
            session.id,
            outcome.imported,
            jobs.len()
        );
        Ok(outcome)
    }
}
