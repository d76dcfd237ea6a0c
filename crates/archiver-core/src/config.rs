use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest read size the hasher will use, regardless of configuration.
pub const MIN_HASH_CHUNK_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub archive_root: PathBuf,
    pub database_path: PathBuf,
    /// Worker threads for hashing. `None` means CPU count - 1.
    pub workers: Option<usize>,
    pub task_timeout_secs: u64,
    pub hash_chunk_bytes: usize,
    pub lookup_batch_size: usize,
    pub transient_retries: u32,
    pub validation_retries: u32,
    pub lock_timeout_secs: u64,
    pub job_max_attempts: u32,
    pub pair_window_secs: u64,
    pub session_retention_days: u32,
    pub ignore_patterns: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from("archive"),
            database_path: PathBuf::from("archiver.db"),
            workers: None,
            task_timeout_secs: 60,
            hash_chunk_bytes: MIN_HASH_CHUNK_BYTES,
            lookup_batch_size: 500,
            transient_retries: 3,
            validation_retries: 1,
            lock_timeout_secs: 300,
            job_max_attempts: 3,
            pair_window_secs: 3,
            session_retention_days: 30,
            ignore_patterns: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Config.toml (optional) overlaid by `ARCHIVER_*` environment variables.
    pub fn load() -> Result<AppConfig, ConfigError> {
        let builder = Config::builder()
            .add_source(ConfigFile::with_name("Config").required(false))
            .add_source(Environment::with_prefix("ARCHIVER"))
            .build()?;
        builder.try_deserialize::<AppConfig>()
    }

    /// Config rooted in a scratch directory, used by tests and tooling.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            archive_root: dir.join("archive"),
            database_path: dir.join("archiver.db"),
            ..Self::default()
        }
    }

    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => num_cpus::get().saturating_sub(1).max(1),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn chunk_bytes(&self) -> usize {
        self.hash_chunk_bytes.max(MIN_HASH_CHUNK_BYTES)
    }
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(&dir));
        result.push(dir);
    }

    result
}
