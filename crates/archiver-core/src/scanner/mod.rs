pub mod grouping;
pub mod media;
pub mod walk;

use crate::cancel::CancelToken;
use crate::config::non_overlapping_directories;
use crate::error::Error;
use crate::ingest::types::ScanResult;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub ignore_patterns: Vec<String>,
    /// Maximum capture-time distance between the two halves of a pair.
    pub pair_window: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            ignore_patterns: Vec::new(),
            pair_window: Duration::from_secs(3),
        }
    }
}

/// Walk the source roots and group what was found. Re-running over the same
/// tree produces an identical result.
pub fn scan(
    roots: &[PathBuf],
    options: &ScanOptions,
    cancel: &CancelToken,
    on_file: walk::WalkProgress<'_>,
) -> Result<ScanResult, Error> {
    let roots = non_overlapping_directories(roots.to_vec());
    info!("Scanning {:?}", roots);
    let started = Instant::now();

    let output = walk::walk_roots(&roots, &options.ignore_patterns, cancel, on_file)?;
    let mut files = output.files;
    let (sidecar_map, pair_map) =
        grouping::group_files(&mut files, options.pair_window.as_millis() as i64);
    let total_bytes = files.iter().map(|f| f.size).sum();

    debug!(
        "Scan completed in {:.2}s: {} files, {} bytes, {} sidecar groups, {} pairs, {} skipped dirs",
        started.elapsed().as_secs_f64(),
        files.len(),
        total_bytes,
        sidecar_map.len(),
        pair_map.len(),
        output.skipped_dirs.len(),
    );

    Ok(ScanResult {
        files,
        total_bytes,
        sidecar_map,
        pair_map,
        skipped_dirs: output.skipped_dirs,
    })
}

/// Convenience for callers that do not track discovery progress.
pub fn scan_quiet(roots: &[PathBuf], options: &ScanOptions) -> Result<ScanResult, Error> {
    scan(roots, options, &CancelToken::new(), &|_: usize, _: &Path| {})
}
