use crate::ingest::types::{
    CopyResult, HashResult, ImportOptions, ScanResult, ValidationResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const TOTAL_STAGES: u8 = 5;

/// Lifecycle of an import session. The five working states run in order;
/// `Failed` and `Cancelled` are reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Scanning,
    Hashing,
    Copying,
    Validating,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl ImportStatus {
    pub const STAGES: [ImportStatus; 5] = [
        ImportStatus::Scanning,
        ImportStatus::Hashing,
        ImportStatus::Copying,
        ImportStatus::Validating,
        ImportStatus::Finalizing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Scanning => "scanning",
            ImportStatus::Hashing => "hashing",
            ImportStatus::Copying => "copying",
            ImportStatus::Validating => "validating",
            ImportStatus::Finalizing => "finalizing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
            ImportStatus::Cancelled => "cancelled",
        }
    }

    /// 1-based position in the pipeline; terminal states report the last stage.
    pub fn stage_index(&self) -> u8 {
        match self {
            ImportStatus::Scanning => 1,
            ImportStatus::Hashing => 2,
            ImportStatus::Copying => 3,
            ImportStatus::Validating => 4,
            _ => TOTAL_STAGES,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportStatus::Completed | ImportStatus::Failed | ImportStatus::Cancelled
        )
    }

    pub fn next(&self) -> Option<ImportStatus> {
        match self {
            ImportStatus::Scanning => Some(ImportStatus::Hashing),
            ImportStatus::Hashing => Some(ImportStatus::Copying),
            ImportStatus::Copying => Some(ImportStatus::Validating),
            ImportStatus::Validating => Some(ImportStatus::Finalizing),
            ImportStatus::Finalizing => Some(ImportStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scanning" => Ok(ImportStatus::Scanning),
            "hashing" => Ok(ImportStatus::Hashing),
            "copying" => Ok(ImportStatus::Copying),
            "validating" => Ok(ImportStatus::Validating),
            "finalizing" => Ok(ImportStatus::Finalizing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            "cancelled" => Ok(ImportStatus::Cancelled),
            other => Err(format!("unknown import status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub files_total: u64,
    pub files_processed: u64,
    pub bytes_total: u64,
    pub bytes_processed: u64,
    pub duplicates: u64,
    pub errors: u64,
}

/// One run of the import pipeline, with the intermediate output of every
/// stage that has finished so far.
#[derive(Debug, Clone)]
pub struct ImportSession {
    pub id: String,
    pub location_id: String,
    pub status: ImportStatus,
    pub source_paths: Vec<PathBuf>,
    pub options: ImportOptions,
    pub counts: SessionCounts,
    pub scan_result: Option<ScanResult>,
    pub hash_results: Option<Vec<HashResult>>,
    pub copy_results: Option<Vec<CopyResult>>,
    pub validation_results: Option<Vec<ValidationResult>>,
    pub error_message: Option<String>,
    pub started_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl ImportSession {
    pub fn new(location_id: &str, source_paths: Vec<PathBuf>, options: ImportOptions) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            location_id: location_id.to_string(),
            status: ImportStatus::Scanning,
            source_paths,
            options,
            counts: SessionCounts::default(),
            scan_result: None,
            hash_results: None,
            copy_results: None,
            validation_results: None,
            error_message: None,
            started_at: now.clone(),
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn stage_index(&self) -> u8 {
        self.status.stage_index()
    }
}

/// A cataloged file in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: i64,
    pub fingerprint: String,
    pub location_id: String,
    pub archive_path: String,
    pub original_path: String,
    pub original_name: String,
    pub extension: String,
    pub kind: String,
    pub role: String,
    pub file_size: i64,
    /// Set on sidecars and paired files: the primary they belong to.
    pub primary_fingerprint: Option<String>,
    pub session_id: String,
    pub imported_at: String,
}

/// Catalog row about to be written by the finalizer.
#[derive(Debug, Clone)]
pub struct NewAsset<'a> {
    pub fingerprint: &'a str,
    pub location_id: &'a str,
    pub archive_path: &'a str,
    pub original_path: &'a str,
    pub original_name: &'a str,
    pub extension: &'a str,
    pub kind: &'a str,
    pub role: &'a str,
    pub file_size: i64,
    pub primary_fingerprint: Option<&'a str>,
    pub session_id: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in ImportStatus::STAGES {
            assert_eq!(status.as_str().parse::<ImportStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<ImportStatus>().is_err());
    }

    #[test]
    fn test_stage_order() {
        let mut status = ImportStatus::Scanning;
        let mut indices = vec![status.stage_index()];
        while let Some(next) = status.next() {
            status = next;
            indices.push(status.stage_index());
        }
        assert_eq!(status, ImportStatus::Completed);
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 5]);
        assert!(ImportStatus::Cancelled.is_terminal());
        assert!(!ImportStatus::Finalizing.is_terminal());
    }
}
