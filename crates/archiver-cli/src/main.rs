mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use archiver_core::ingest::copier::purge_orphans;
use archiver_core::queue::payload::ALL_QUEUES;
use archiver_core::{
    AppConfig, CompletionEvent, Database, ImportOptions, ImportRequest, ImportStatus, Importer,
    JobQueue, WorkerPool,
};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, ImportArgs, JobsCommand};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let outcome = match args.command {
        Some(Commands::Import(import)) => run_import(&config, import),
        Some(Commands::Resume { session_id }) => run_resume(&config, &session_id),
        Some(Commands::List { limit }) => run_list(&config, limit),
        Some(Commands::Cancel { session_id }) => run_cancel(&config, &session_id),
        Some(Commands::Jobs(command)) => run_jobs(&config, command),
        Some(Commands::Purge) => run_purge(&config),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => run_truncate(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = outcome {
        error!("Error: {:#}", err);
        process::exit(1);
    }
    Ok(())
}

fn build_importer(config: &AppConfig) -> (Importer, Arc<WorkerPool>) {
    let pool = Arc::new(WorkerPool::from_config(config));
    let importer = Importer::new(config.clone(), Arc::clone(&pool), Arc::new(CliReporter::new()));
    (importer, pool)
}

fn run_import(config: &AppConfig, args: ImportArgs) -> anyhow::Result<()> {
    let options = ImportOptions {
        allow_hard_link: !args.no_link,
        ignore_patterns: args.ignore_patterns,
        ..ImportOptions::default()
    };
    let request = ImportRequest::new(args.paths, args.location).with_options(options);

    let (importer, pool) = build_importer(config);
    let result = importer.run(request);
    pool.shutdown();
    print_summary(&result.context("import could not start")?);
    Ok(())
}

fn run_resume(config: &AppConfig, session_id: &str) -> anyhow::Result<()> {
    let (importer, pool) = build_importer(config);
    let result = importer.resume(session_id);
    pool.shutdown();
    print_summary(&result.with_context(|| format!("cannot resume {}", session_id))?);
    Ok(())
}

fn print_summary(event: &CompletionEvent) {
    println!();
    let status = event
        .status
        .map(|s| paint_status(s).to_string())
        .unwrap_or_default();
    info!("Session {} {}", event.session_id, status);
    info!(
        "{} imported, {} duplicates, {} failed",
        format!("{}", event.imported).green(),
        format!("{}", event.duplicates).yellow(),
        format!("{}", event.failed).red(),
    );
    for (queue, count) in &event.jobs_queued_by_type {
        info!("  {} {} jobs queued", format!("{}", count).cyan(), queue);
    }
    for file_error in &event.file_errors {
        warn!(
            "  {} [{}] {}",
            file_error.path.display(),
            file_error.stage,
            file_error.message
        );
    }
    if let Some(message) = &event.error {
        error!("{}", message);
        if event.status == Some(ImportStatus::Finalizing) {
            info!("Run `archiver resume {}` to retry the commit", event.session_id);
        }
    }
}

fn paint_status(status: ImportStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        ImportStatus::Completed => text.green(),
        ImportStatus::Failed => text.red(),
        ImportStatus::Cancelled => text.yellow(),
        _ => text.cyan(),
    }
}

fn run_list(config: &AppConfig, limit: usize) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)?;
    let sessions = db.list_sessions(limit)?;
    if sessions.is_empty() {
        info!("No import sessions");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  {:<10}  {}  {}/{} files, {} duplicates, {} errors  started {}",
            session.id,
            paint_status(session.status),
            session.location_id,
            session.counts.files_processed,
            session.counts.files_total,
            session.counts.duplicates,
            session.counts.errors,
            session.started_at,
        );
        if let Some(message) = &session.error_message {
            println!("    {}", message.red());
        }
    }
    Ok(())
}

fn run_cancel(config: &AppConfig, session_id: &str) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)?;
    if db.mark_session_cancelled(session_id)? {
        info!("Session {} will stop at its next stage boundary", session_id);
    } else {
        warn!("Session {} is unknown or already finished", session_id);
    }
    Ok(())
}

fn run_jobs(config: &AppConfig, command: JobsCommand) -> anyhow::Result<()> {
    let queue = JobQueue::from_config(config)?;
    match command {
        JobsCommand::Stats { queue: name } => {
            let names: Vec<String> = match name {
                Some(name) => vec![name],
                None => ALL_QUEUES.iter().map(|q| q.to_string()).collect(),
            };
            for name in names {
                let stats = queue.get_queue_stats(&name)?;
                println!(
                    "{:<12} pending {:>6}  active {:>6}  done {:>6}  failed {:>6}",
                    name,
                    stats.pending,
                    stats.active,
                    stats.done,
                    format!("{}", stats.failed).red()
                );
            }
        }
        JobsCommand::DeadLetter { queue: name } => {
            let entries = queue.list_dead_letter(&name)?;
            if entries.is_empty() {
                info!("No dead-lettered jobs on {}", name);
            }
            for entry in entries {
                println!(
                    "{:>6}  job {}  {} attempts  {}",
                    entry.id,
                    entry.job_id,
                    entry.attempts,
                    entry.error.unwrap_or_default().red()
                );
            }
        }
        JobsCommand::Retry { entry_id } => {
            if queue.retry_dead_letter(entry_id)? {
                info!("Dead-letter entry {} requeued", entry_id);
            } else {
                warn!("No dead-letter entry {}", entry_id);
            }
        }
        JobsCommand::Ack { entry_ids } => {
            let removed = queue.acknowledge_dead_letter(&entry_ids)?;
            info!("Acknowledged {} dead-letter entries", removed);
        }
    }
    Ok(())
}

fn run_purge(config: &AppConfig) -> anyhow::Result<()> {
    let retention_days = i64::from(config.session_retention_days);
    let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);

    let db = Database::open(&config.database_path)?;
    let sessions = db.purge_sessions(cutoff)?;

    let queue = JobQueue::new(db, config.lock_timeout(), config.job_max_attempts);
    let jobs = queue.purge_completed(Duration::from_secs(retention_days as u64 * 24 * 60 * 60))?;

    let orphans = if config.archive_root.exists() {
        purge_orphans(&config.archive_root)?
    } else {
        0
    };

    info!(
        "Purged {} sessions, {} completed jobs, {} orphaned staging files",
        format!("{}", sessions).cyan(),
        format!("{}", jobs).cyan(),
        format!("{}", orphans).cyan(),
    );
    Ok(())
}

fn run_truncate(config: &AppConfig) -> anyhow::Result<()> {
    let confirmed = prompt_confirm(
        "Are you SURE you want to COMPLETELY DELETE the catalog, sessions and job queues?",
        Some(false),
    )?;
    if !confirmed {
        return Ok(());
    }
    Database::open(&config.database_path)?.truncate_all()?;
    println!("All tables truncated");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
