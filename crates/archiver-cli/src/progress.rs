use archiver_core::{CompletionEvent, ImportStatus, ProgressEvent, ProgressReporter};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

struct StageBar {
    stage: ImportStatus,
    bar: ProgressBar,
    started: Instant,
}

/// CLI progress reporter using indicatif progress bars.
///
/// - Scan stage: spinner (file count unknown until the walk ends)
/// - Hash, copy and validate stages: progress bar over the stage's files
/// - Finalize stage: spinner
pub struct CliReporter {
    current: Mutex<Option<StageBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_chars(TICK_CHARS),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn bar(label: &str) -> ProgressBar {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::with_template(&format!(
                "  {{spinner:.cyan}} {:<10} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} files {{msg}}",
                label
            ))
            .unwrap()
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn start_stage(stage: ImportStatus) -> StageBar {
        let bar = match stage {
            ImportStatus::Scanning => Self::spinner("Scanning sources..."),
            ImportStatus::Hashing => Self::bar("Hashing"),
            ImportStatus::Copying => Self::bar("Copying"),
            ImportStatus::Validating => Self::bar("Validating"),
            _ => Self::spinner("Committing to catalog..."),
        };
        StageBar {
            stage,
            bar,
            started: Instant::now(),
        }
    }

    fn finish(stage_bar: StageBar) {
        stage_bar.bar.finish_and_clear();
        eprintln!(
            "  \x1b[32m✓\x1b[0m {} done in {:.2}s",
            stage_bar.stage,
            stage_bar.started.elapsed().as_secs_f64()
        );
    }
}

impl ProgressReporter for CliReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        let mut guard = self.current.lock().unwrap();
        let same_stage = guard.as_ref().is_some_and(|s| s.stage == event.stage);
        if !same_stage {
            if let Some(previous) = guard.take() {
                Self::finish(previous);
            }
            *guard = Some(Self::start_stage(event.stage));
        }

        let Some(current) = guard.as_ref() else {
            return;
        };
        let pb = &current.bar;
        match event.stage {
            ImportStatus::Scanning => {
                pb.set_message(format!("Scanning... {} files found", event.files_processed));
            }
            ImportStatus::Finalizing => {}
            _ => {
                if pb.length() != Some(event.files_total) {
                    pb.set_length(event.files_total);
                }
                pb.set_position(event.files_processed);
                let name = event
                    .current_file
                    .as_deref()
                    .and_then(|f| Path::new(f).file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                pb.set_message(format!(
                    "{} / {} {:.0}% {}",
                    HumanBytes(event.bytes_processed),
                    HumanBytes(event.bytes_total),
                    event.percent,
                    name
                ));
            }
        }
    }

    fn on_complete(&self, _event: &CompletionEvent) {
        if let Some(current) = self.current.lock().unwrap().take() {
            Self::finish(current);
        }
    }
}
