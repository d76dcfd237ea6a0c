use std::io;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{stage} stage failed: {message}")]
    StageFatal { stage: &'static str, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    Other(String),
}

/// Failures of a single task submitted to the worker pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("task exceeded the {0:?} timeout")]
    Timeout(Duration),

    #[error("worker crashed while running the task")]
    WorkerCrashed,

    #[error("worker pool is shut down")]
    ShutDown,

    #[error("task cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Locked files and network blips surface as these kinds; everything else is
/// treated as a permanent per-file failure.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Run `op`, retrying up to `retries` extra times while it fails with a
/// transient I/O error. Backs off 50ms, 100ms, 200ms, ...
pub fn retry_transient<T>(
    retries: u32,
    what: &str,
    mut op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retries && is_transient(&err) => {
                attempt += 1;
                warn!("Transient error on {} (attempt {}): {}", what, attempt, err);
                thread::sleep(Duration::from_millis(50 << (attempt - 1).min(6)));
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_retry_transient_recovers() {
        let calls = Cell::new(0);
        let result = retry_transient(3, "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::new(io::ErrorKind::Interrupted, "blip"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_transient_gives_up_on_permanent_error() {
        let calls = Cell::new(0);
        let result: io::Result<()> = retry_transient(3, "test", || {
            calls.set(calls.get() + 1);
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1, "permanent errors must not be retried");
    }

    #[test]
    fn test_pool_errors_surface_through_error() {
        let err: Error = PoolError::Timeout(Duration::from_secs(2)).into();
        assert_eq!(err.to_string(), "Worker pool error: task exceeded the 2s timeout");
        let err: Error = PoolError::WorkerCrashed.into();
        assert!(matches!(err, Error::Pool(PoolError::WorkerCrashed)));
    }
}
