use super::types::{HashResult, ScanResult};
use super::{FileProgress, OnFile};
use crate::cancel::CancelToken;
use crate::error::{retry_transient, Error, PoolError, Result};
use crate::hasher::{hash_file, Fingerprint};
use crate::pool::WorkerPool;
use crate::storage::Database;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fingerprints every scanned file on the pool and classifies it against
/// the catalog. Duplicates stay in the output, flagged.
pub struct HashStage<'a> {
    pub pool: &'a WorkerPool,
    pub db: &'a Database,
    pub chunk_bytes: usize,
    pub transient_retries: u32,
    pub lookup_batch_size: usize,
}

impl HashStage<'_> {
    pub fn run(
        &self,
        scan: &ScanResult,
        cancel: &CancelToken,
        on_file: OnFile<'_>,
    ) -> Result<Vec<HashResult>> {
        let started = Instant::now();
        let chunk_bytes = self.chunk_bytes;
        let retries = self.transient_retries;

        let tasks: Vec<_> = scan
            .files
            .iter()
            .map(|file| {
                let path = file.path.clone();
                move || {
                    let what = path.display().to_string();
                    retry_transient(retries, &what, || hash_file(&path, chunk_bytes))
                        .map_err(|e| e.to_string())
                }
            })
            .collect();

        let outcomes = self
            .pool
            .submit_batch_with_progress(tasks, cancel, |completed, total, index, result| {
                let file = &scan.files[index];
                on_file(&FileProgress {
                    completed,
                    total,
                    path: &file.path,
                    bytes: file.size,
                    failed: !matches!(result, Ok(Ok(_))),
                });
            })
            .map_err(|e| match e {
                PoolError::Cancelled => Error::Cancelled,
                other => Error::Pool(other),
            })?;

        let mut results: Vec<HashResult> = outcomes
            .into_iter()
            .enumerate()
            .map(|(file_index, outcome)| {
                let (fingerprint, error) = match outcome {
                    Ok(Ok((fingerprint, _))) => (Some(fingerprint), None),
                    Ok(Err(message)) => (None, Some(message)),
                    Err(pool_error) => (None, Some(pool_error.to_string())),
                };
                if let Some(error) = &error {
                    warn!("Failed to hash {}: {}", scan.files[file_index].path.display(), error);
                }
                HashResult {
                    file_index,
                    fingerprint,
                    is_duplicate: false,
                    existing_ref: None,
                    error,
                }
            })
            .collect();

        self.mark_duplicates(&mut results)?;

        let duplicates = results.iter().filter(|r| r.is_duplicate).count();
        info!(
            "Hashed {} files in {:.2}s ({} duplicates)",
            results.len(),
            started.elapsed().as_secs_f64(),
            duplicates
        );
        Ok(results)
    }

    /// Flag files whose content is already cataloged, then files repeating
    /// content seen earlier in the same batch.
    fn mark_duplicates(&self, results: &mut [HashResult]) -> Result<()> {
        let fingerprints: Vec<Fingerprint> = results
            .iter()
            .filter_map(|r| r.fingerprint.clone())
            .collect();

        let mut cataloged: HashMap<Fingerprint, String> = HashMap::new();
        for batch in fingerprints.chunks(self.lookup_batch_size.max(1)) {
            cataloged.extend(self.db.find_by_fingerprints(batch)?);
        }
        debug!(
            "Catalog lookup: {} of {} fingerprints already archived",
            cataloged.len(),
            fingerprints.len()
        );

        let mut first_seen: HashMap<Fingerprint, usize> = HashMap::new();
        for result in results.iter_mut() {
            let Some(fingerprint) = &result.fingerprint else {
                continue;
            };
            if let Some(existing) = cataloged.get(fingerprint) {
                result.is_duplicate = true;
                result.existing_ref = Some(existing.clone());
            } else if first_seen.contains_key(fingerprint) {
                result.is_duplicate = true;
            } else {
                first_seen.insert(fingerprint.clone(), result.file_index);
            }
        }
        Ok(())
    }
}
