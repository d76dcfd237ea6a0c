use super::types::{CopyResult, ValidationResult};
use super::{FileProgress, OnFile};
use crate::cancel::CancelToken;
use crate::error::{Error, PoolError, Result};
use crate::hasher::{hash_file, Fingerprint};
use crate::pool::WorkerPool;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

/// A copied file to check: where it landed and what it should hash to.
#[derive(Debug, Clone)]
pub struct ValidationTarget {
    pub file_index: usize,
    pub destination: PathBuf,
    pub size: u64,
    pub expected: Fingerprint,
}

impl ValidationTarget {
    pub fn from_copy(copy: &CopyResult, expected: Fingerprint, size: u64) -> Self {
        Self {
            file_index: copy.file_index,
            destination: copy.destination.clone(),
            size,
            expected,
        }
    }
}

/// Re-hashes archive copies on the pool. A copy that does not match its
/// source is deleted so it can never be cataloged.
pub struct Validator<'a> {
    pub pool: &'a WorkerPool,
    pub chunk_bytes: usize,
}

impl Validator<'_> {
    pub fn run(
        &self,
        targets: &[ValidationTarget],
        cancel: &CancelToken,
        on_file: OnFile<'_>,
    ) -> Result<Vec<ValidationResult>> {
        let started = Instant::now();
        let chunk_bytes = self.chunk_bytes;
        let tasks: Vec<_> = targets
            .iter()
            .map(|target| {
                let destination = target.destination.clone();
                move || hash_file(&destination, chunk_bytes).map_err(|e| e.to_string())
            })
            .collect();

        let outcomes = self
            .pool
            .submit_batch_with_progress(tasks, cancel, |completed, total, index, result| {
                let target = &targets[index];
                let matches = matches!(result, Ok(Ok((fp, _))) if fp == &target.expected);
                on_file(&FileProgress {
                    completed,
                    total,
                    path: &target.destination,
                    bytes: target.size,
                    failed: !matches,
                });
            })
            .map_err(|e| match e {
                PoolError::Cancelled => Error::Cancelled,
                other => Error::Pool(other),
            })?;

        let results: Vec<ValidationResult> = targets
            .iter()
            .zip(outcomes)
            .map(|(target, outcome)| {
                let (destination_fingerprint, error) = match outcome {
                    Ok(Ok((fingerprint, _))) => (Some(fingerprint), None),
                    Ok(Err(message)) => (None, Some(message)),
                    Err(pool_error) => (None, Some(pool_error.to_string())),
                };
                let valid = destination_fingerprint.as_ref() == Some(&target.expected);
                let error = if valid {
                    None
                } else {
                    error!(
                        "Archive copy {} failed validation (expected {}, got {:?})",
                        target.destination.display(),
                        target.expected,
                        destination_fingerprint
                    );
                    if let Err(e) = fs::remove_file(&target.destination) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            error!("Could not delete {}: {}", target.destination.display(), e);
                        }
                    }
                    Some(error.unwrap_or_else(|| "content does not match source".to_string()))
                };
                ValidationResult {
                    file_index: target.file_index,
                    valid,
                    source_fingerprint: target.expected.clone(),
                    destination_fingerprint,
                    error,
                }
            })
            .collect();

        info!(
            "Validated {} files in {:.2}s ({} invalid)",
            results.len(),
            started.elapsed().as_secs_f64(),
            results.iter().filter(|r| !r.valid).count()
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_reader;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_mismatch_deletes_copy() {
        let tmp = tempdir().unwrap();
        let good = tmp.path().join("good.jpg");
        let bad = tmp.path().join("bad.jpg");
        fs::write(&good, b"original").unwrap();
        fs::write(&bad, b"bit-rotted").unwrap();
        let (expected, _) = hash_reader(&b"original"[..], 64).unwrap();

        let targets = vec![
            ValidationTarget {
                file_index: 0,
                destination: good.clone(),
                size: 8,
                expected: expected.clone(),
            },
            ValidationTarget {
                file_index: 1,
                destination: bad.clone(),
                size: 8,
                expected: expected.clone(),
            },
        ];
        let pool = WorkerPool::new(2, Duration::from_secs(10));
        let validator = Validator {
            pool: &pool,
            chunk_bytes: 1024 * 1024,
        };
        let mut failed = 0;
        let results = validator
            .run(&targets, &CancelToken::new(), &mut |p| {
                if p.failed {
                    failed += 1
                }
            })
            .unwrap();

        assert!(results[0].valid);
        assert_eq!(results[0].destination_fingerprint, Some(expected));
        assert!(!results[1].valid);
        assert!(results[1].error.is_some());
        assert_eq!(failed, 1);
        assert!(good.exists());
        assert!(!bad.exists(), "corrupt copy must be removed");
    }

    #[test]
    fn test_missing_copy_is_invalid() {
        let tmp = tempdir().unwrap();
        let (expected, _) = hash_reader(&b"x"[..], 64).unwrap();
        let pool = WorkerPool::new(1, Duration::from_secs(10));
        let validator = Validator {
            pool: &pool,
            chunk_bytes: 1024 * 1024,
        };
        let results = validator
            .run(
                &[ValidationTarget {
                    file_index: 3,
                    destination: tmp.path().join("gone.jpg"),
                    size: 1,
                    expected,
                }],
                &CancelToken::new(),
                &mut |_| {},
            )
            .unwrap();
        assert!(!results[0].valid);
        assert_eq!(results[0].file_index, 3);
        assert!(results[0].destination_fingerprint.is_none());
    }
}
