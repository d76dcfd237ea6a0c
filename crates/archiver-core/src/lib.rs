pub mod cancel;
pub mod config;
pub mod error;
pub mod hasher;
pub mod ingest;
pub mod orchestrator;
pub mod platform;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod scanner;
pub mod storage;

pub use cancel::CancelToken;
pub use config::AppConfig;
pub use error::{Error, PoolError};
pub use ingest::types::ImportOptions;
pub use ingest::ImportRequest;
pub use orchestrator::{Importer, SessionHandle};
pub use pool::WorkerPool;
pub use progress::{CompletionEvent, ProgressEvent, ProgressReporter, SilentReporter};
pub use queue::{JobPayload, JobQueue};
pub use storage::{Database, ImportStatus};
