use crate::hasher::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Primary,
    Sidecar,
    /// Derivative half of a pair: the preview next to a raw, or the motion
    /// clip next to a still.
    PairedOriginal,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Primary => "primary",
            FileRole::Sidecar => "sidecar",
            FileRole::PairedOriginal => "paired_original",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Raw,
    Video,
    Sidecar,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Raw => "raw",
            MediaKind::Video => "video",
            MediaKind::Sidecar => "sidecar",
            MediaKind::Other => "other",
        }
    }

    /// Kinds that get a thumbnail job after import.
    pub fn is_visual(&self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Raw | MediaKind::Video)
    }
}

/// A discovered source file. Files are referenced across stages by their
/// index in [`ScanResult::files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time, Unix milliseconds.
    pub modified_ms: i64,
    /// Lowercase, dot-less, normalized (`jpeg` → `jpg`).
    pub extension: String,
    pub kind: MediaKind,
    pub role: FileRole,
    /// Shared grouping key: parent directory + lowercase base name.
    pub base_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub files: Vec<ScannedFile>,
    pub total_bytes: u64,
    /// base key → sidecar paths attached to that base name.
    pub sidecar_map: BTreeMap<String, BTreeSet<PathBuf>>,
    /// primary path → derivative partner paths.
    pub pair_map: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    /// Directories that could not be read.
    pub skipped_dirs: Vec<PathBuf>,
}

impl ScanResult {
    /// The primary a sidecar or paired file belongs to, if one was found.
    pub fn primary_of(&self, index: usize) -> Option<&ScannedFile> {
        let file = self.files.get(index)?;
        match file.role {
            FileRole::Primary => None,
            FileRole::PairedOriginal => {
                let primary = self
                    .pair_map
                    .iter()
                    .find(|(_, partners)| partners.contains(&file.path))
                    .map(|(primary, _)| primary)?;
                self.files.iter().find(|f| &f.path == primary)
            }
            FileRole::Sidecar => self
                .files
                .iter()
                .find(|f| f.role == FileRole::Primary && f.base_key == file.base_key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashResult {
    pub file_index: usize,
    pub fingerprint: Option<Fingerprint>,
    pub is_duplicate: bool,
    /// Archive path of the catalog asset this file duplicates. `None` for a
    /// duplicate of another file in the same batch.
    pub existing_ref: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStrategy {
    HardLink,
    Clone,
    FullCopy,
    /// Destination already held a verified copy.
    AlreadyPresent,
}

impl CopyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStrategy::HardLink => "hard_link",
            CopyStrategy::Clone => "clone",
            CopyStrategy::FullCopy => "full_copy",
            CopyStrategy::AlreadyPresent => "already_present",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyResult {
    pub file_index: usize,
    pub destination: PathBuf,
    pub strategy: Option<CopyStrategy>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub file_index: usize,
    pub valid: bool,
    pub source_fingerprint: Fingerprint,
    pub destination_fingerprint: Option<Fingerprint>,
    pub error: Option<String>,
}

/// A file that did not make it into the catalog, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: PathBuf,
    pub stage: String,
    pub message: String,
}

/// Caller-supplied knobs carried with an ingestion request and persisted
/// with the session so a resume behaves like the original run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub allow_hard_link: bool,
    pub allow_clone: bool,
    /// Added to the configured ignore patterns for this session only.
    pub ignore_patterns: Vec<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            allow_hard_link: true,
            allow_clone: true,
            ignore_patterns: Vec::new(),
        }
    }
}
