use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "archiver")]
#[command(about = "Resumable media ingestion into a content-addressed archive", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import media from one or more source directories
    Import(ImportArgs),
    /// Resume an interrupted import session
    Resume {
        session_id: String,
    },
    /// List recent import sessions
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Cancel a running import session
    Cancel {
        session_id: String,
    },
    /// Inspect and manage the follow-up job queues
    #[command(subcommand)]
    Jobs(JobsCommand),
    /// Remove old sessions, finished jobs and orphaned staging files
    Purge,
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Source directories to scan
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Catalog location the files are filed under
    #[arg(short, long)]
    pub location: String,
    /// Always copy bytes instead of hard-linking on the same volume
    #[arg(long)]
    pub no_link: bool,
    /// Extra glob patterns to skip for this import
    #[arg(long = "ignore")]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// Show job counts per status
    Stats {
        /// Queue to report on; all queues when omitted
        queue: Option<String>,
    },
    /// List jobs that ran out of attempts
    DeadLetter {
        queue: String,
    },
    /// Requeue a dead-lettered job with a fresh set of attempts
    Retry {
        entry_id: i64,
    },
    /// Drop dead-letter entries and their failed jobs
    Ack {
        #[arg(required = true)]
        entry_ids: Vec<i64>,
    },
}
