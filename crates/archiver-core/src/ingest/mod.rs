//! The per-session pipeline stages that run after the scanner: hashing,
//! copying, validation and the catalog commit.

pub mod copier;
pub mod finalizer;
pub mod hash_stage;
pub mod types;
pub mod validator;

use std::path::{Path, PathBuf};
use types::ImportOptions;

/// What a caller asks to import and where the files belong.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source_paths: Vec<PathBuf>,
    /// Catalog location the imported files are filed under.
    pub location_id: String,
    pub options: ImportOptions,
}

impl ImportRequest {
    pub fn new(source_paths: Vec<PathBuf>, location_id: impl Into<String>) -> Self {
        Self {
            source_paths,
            location_id: location_id.into(),
            options: ImportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }
}

/// One file finished within a stage. Reported in completion order.
#[derive(Debug, Clone, Copy)]
pub struct FileProgress<'a> {
    pub completed: usize,
    pub total: usize,
    pub path: &'a Path,
    pub bytes: u64,
    pub failed: bool,
}

pub type OnFile<'a> = &'a mut dyn FnMut(&FileProgress<'_>);
