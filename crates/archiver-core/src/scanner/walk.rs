use super::media::{base_key, classify, is_excluded, normalize_extension};
use crate::cancel::CancelToken;
use crate::error::Error;
use crate::ingest::types::{FileRole, ScannedFile};
use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;
use tracing::{error, trace, warn};

/// Called with the running file count and the file just discovered.
pub type WalkProgress<'a> = &'a (dyn Fn(usize, &Path) + Sync);

pub struct WalkOutput {
    pub files: Vec<ScannedFile>,
    pub skipped_dirs: Vec<PathBuf>,
}

/// Parallel directory traversal. Keyed on path so every file is recorded
/// exactly once. Unreadable directories are logged and skipped; only
/// cancellation aborts the walk.
pub fn walk_roots(
    root_paths: &[PathBuf],
    ignore_globs: &[String],
    cancel: &CancelToken,
    on_file: WalkProgress<'_>,
) -> Result<WalkOutput, Error> {
    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let walker = Walker {
        files: DashMap::new(),
        skipped: Mutex::new(Vec::new()),
        found: AtomicUsize::new(0),
        ignore_patterns,
        cancel,
        on_file,
    };

    root_paths
        .par_iter()
        .try_for_each(|root| walker.visit(root, true))?;

    let mut files: Vec<ScannedFile> = walker.files.into_iter().map(|(_, f)| f).collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let mut skipped_dirs = walker.skipped.into_inner().unwrap_or_default();
    skipped_dirs.sort();

    Ok(WalkOutput {
        files,
        skipped_dirs,
    })
}

struct Walker<'a> {
    files: DashMap<PathBuf, ScannedFile>,
    skipped: Mutex<Vec<PathBuf>>,
    found: AtomicUsize,
    ignore_patterns: Vec<Pattern>,
    cancel: &'a CancelToken,
    on_file: WalkProgress<'a>,
}

impl Walker<'_> {
    fn visit(&self, path: &Path, is_root: bool) -> Result<(), Error> {
        self.cancel.check()?;

        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Error getting metadata for {}: {}", path.display(), err);
                return Ok(());
            }
        };

        if metadata.file_type().is_symlink() {
            trace!("Skipping symlink {}", path.display());
            return Ok(());
        }

        if metadata.is_file() {
            self.record(path, &metadata);
            return Ok(());
        }

        if !metadata.is_dir() {
            return Ok(());
        }

        // roots are taken as given, even when they live under a dot directory
        let is_hidden_dir = !is_root
            && path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if is_hidden_dir
            || self
                .ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(path))
        {
            return Ok(());
        }

        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) => {
                error!("Unable to read directory {}: {}", path.display(), err);
                self.skipped.lock().unwrap().push(path.to_path_buf());
                return Ok(());
            }
        };

        entries.par_bridge().try_for_each(|entry_result| {
            match entry_result {
                Ok(entry) => self.visit(&entry.path(), false),
                Err(err) => {
                    warn!("Error reading entry in directory {}: {}", path.display(), err);
                    Ok(())
                }
            }
        })
    }

    fn record(&self, path: &Path, metadata: &Metadata) {
        if is_excluded(path, &self.ignore_patterns) {
            trace!("Excluded {}", path.display());
            return;
        }

        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let extension = normalize_extension(&absolute);

        let scanned = ScannedFile {
            size: metadata.len(),
            modified_ms,
            kind: classify(&extension),
            extension,
            role: FileRole::Primary,
            base_key: base_key(&absolute),
            path: absolute.clone(),
        };

        if self.files.insert(absolute.clone(), scanned).is_none() {
            let count = self.found.fetch_add(1, Ordering::Relaxed) + 1;
            (self.on_file)(count, &absolute);
        }
    }
}
