use super::types::{CopyResult, CopyStrategy, ImportOptions, ScanResult};
use super::{FileProgress, OnFile};
use crate::cancel::CancelToken;
use crate::error::{is_transient, retry_transient, Error, Result};
use crate::hasher::{hash_file, Fingerprint};
use crate::platform;
use crate::scanner::media::TEMP_SUFFIX;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Root of one location's archive tree.
pub fn location_dir(archive_root: &Path, location_id: &str) -> PathBuf {
    archive_root.join("locations").join(location_id)
}

/// `<root>/locations/<location>/<fp[0..2]>/<fp>.<ext>`
pub fn destination_for(
    archive_root: &Path,
    location_id: &str,
    fingerprint: &Fingerprint,
    extension: &str,
) -> PathBuf {
    let file_name = if extension.is_empty() {
        fingerprint.to_string()
    } else {
        format!("{}.{}", fingerprint, extension)
    };
    location_dir(archive_root, location_id)
        .join(fingerprint.shard())
        .join(file_name)
}

/// `<destination>.<writer>.tmp`. Every copy attempt stages under its own
/// writer tag so concurrent sessions archiving the same content never touch
/// each other's partial files.
pub fn staging_path(destination: &Path, writer: &str) -> PathBuf {
    let mut staged = destination.as_os_str().to_owned();
    staged.push(".");
    staged.push(writer);
    staged.push(TEMP_SUFFIX);
    PathBuf::from(staged)
}

/// Whether `destination` already holds the bytes of `fingerprint`.
fn holds(destination: &Path, fingerprint: &Fingerprint, chunk_bytes: usize) -> bool {
    matches!(hash_file(destination, chunk_bytes), Ok((existing, _)) if &existing == fingerprint)
}

/// A file scheduled for copying: its scan index and source fingerprint.
#[derive(Debug, Clone)]
pub struct CopyTarget {
    pub file_index: usize,
    pub fingerprint: Fingerprint,
}

/// Moves new files into the archive tree, one at a time, staging each under
/// the temp suffix and renaming it into place only once fully written.
pub struct Copier<'a> {
    pub archive_root: &'a Path,
    pub location_id: &'a str,
    pub options: &'a ImportOptions,
    pub chunk_bytes: usize,
    pub transient_retries: u32,
}

impl Copier<'_> {
    pub fn run(
        &self,
        scan: &ScanResult,
        targets: &[CopyTarget],
        cancel: &CancelToken,
        on_file: OnFile<'_>,
    ) -> Result<Vec<CopyResult>> {
        let started = Instant::now();
        let root = location_dir(self.archive_root, self.location_id);
        fs::create_dir_all(&root).map_err(|e| Error::StageFatal {
            stage: "copying",
            message: format!("archive root {} is not writable: {}", root.display(), e),
        })?;

        let mut results = Vec::with_capacity(targets.len());
        for (n, target) in targets.iter().enumerate() {
            cancel.check()?;
            let file = &scan.files[target.file_index];
            let destination = destination_for(
                self.archive_root,
                self.location_id,
                &target.fingerprint,
                &file.extension,
            );

            let outcome = self.copy_one(&file.path, &destination, &target.fingerprint);
            let result = match outcome {
                Ok(strategy) => {
                    trace!(
                        "{} -> {} ({})",
                        file.path.display(),
                        destination.display(),
                        strategy.as_str()
                    );
                    CopyResult {
                        file_index: target.file_index,
                        destination,
                        strategy: Some(strategy),
                        success: true,
                        error: None,
                    }
                }
                Err(err) => {
                    error!("Failed to copy {}: {}", file.path.display(), err);
                    CopyResult {
                        file_index: target.file_index,
                        destination,
                        strategy: None,
                        success: false,
                        error: Some(err.to_string()),
                    }
                }
            };
            on_file(&FileProgress {
                completed: n + 1,
                total: targets.len(),
                path: &file.path,
                bytes: file.size,
                failed: !result.success,
            });
            results.push(result);
        }

        info!(
            "Copied {} files in {:.2}s ({} failed)",
            results.len(),
            started.elapsed().as_secs_f64(),
            results.iter().filter(|r| !r.success).count()
        );
        Ok(results)
    }

    fn copy_one(
        &self,
        source: &Path,
        destination: &Path,
        fingerprint: &Fingerprint,
    ) -> io::Result<CopyStrategy> {
        if destination.exists() {
            if holds(destination, fingerprint, self.chunk_bytes) {
                return Ok(CopyStrategy::AlreadyPresent);
            }
            warn!("Replacing mismatched archive file {}", destination.display());
            match fs::remove_file(destination) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        let parent = destination
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
        fs::create_dir_all(parent)?;

        let writer = Uuid::new_v4().simple().to_string();
        let staged = staging_path(destination, &writer);
        let strategy = match self.stage(source, &staged) {
            Ok(strategy) => strategy,
            Err(err) => {
                let _ = fs::remove_file(&staged);
                return Err(err);
            }
        };

        // another session may have archived the same content meanwhile
        if destination.exists() && holds(destination, fingerprint, self.chunk_bytes) {
            let _ = fs::remove_file(&staged);
            debug!("{} archived concurrently", destination.display());
            return Ok(CopyStrategy::AlreadyPresent);
        }

        if let Err(err) = fs::rename(&staged, destination) {
            let _ = fs::remove_file(&staged);
            if holds(destination, fingerprint, self.chunk_bytes) {
                return Ok(CopyStrategy::AlreadyPresent);
            }
            return Err(err);
        }
        if let Err(err) = platform::sync_dir(parent) {
            debug!("Could not sync {}: {}", parent.display(), err);
        }
        Ok(strategy)
    }

    /// Materialize `source` at `staged` using the cheapest strategy allowed.
    fn stage(&self, source: &Path, staged: &Path) -> io::Result<CopyStrategy> {
        if self.options.allow_hard_link && platform::same_volume(source, staged) {
            match fs::hard_link(source, staged) {
                Ok(()) => return Ok(CopyStrategy::HardLink),
                Err(err) => debug!("Hard link failed for {}: {}", source.display(), err),
            }
        }

        if self.options.allow_clone {
            match platform::clone_file(source, staged) {
                Ok(()) => return Ok(CopyStrategy::Clone),
                Err(err) => trace!("Clone unavailable for {}: {}", source.display(), err),
            }
        }

        let what = source.display().to_string();
        retry_transient(self.transient_retries, &what, || {
            // the staging name is private to this attempt
            let _ = fs::remove_file(staged);
            full_copy(source, staged, self.chunk_bytes)
        })?;
        Ok(CopyStrategy::FullCopy)
    }
}

/// Byte copy through buffered streams, fsynced before returning.
fn full_copy(source: &Path, staged: &Path, chunk_bytes: usize) -> io::Result<u64> {
    let mut reader = BufReader::with_capacity(chunk_bytes, File::open(source)?);
    let target = OpenOptions::new().write(true).create_new(true).open(staged)?;
    let mut writer = BufWriter::with_capacity(chunk_bytes, target);
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    let target = writer.into_inner().map_err(|e| e.into_error())?;
    target.sync_all()?;
    Ok(copied)
}

/// Delete staging files left behind by interrupted copies. Returns how many
/// were removed.
pub fn purge_orphans(archive_root: &Path) -> Result<usize> {
    let pattern = format!(
        "{}/**/*{}",
        glob::Pattern::escape(&archive_root.to_string_lossy()),
        TEMP_SUFFIX
    );
    let entries = glob::glob(&pattern).map_err(|e| Error::Other(e.to_string()))?;

    let mut removed = 0;
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed orphan {}", path.display());
                    removed += 1;
                }
                Err(err) if is_transient(&err) => warn!("Orphan {} busy: {}", path.display(), err),
                Err(err) => error!("Failed to remove orphan {}: {}", path.display(), err),
            },
            Ok(_) => {}
            Err(err) => warn!("Unreadable path while purging orphans: {}", err),
        }
    }
    if removed > 0 {
        info!("Purged {} orphaned staging files", removed);
    }
    Ok(removed)
}
