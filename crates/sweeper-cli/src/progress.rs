use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use sweeper_core::ExecutionReporter;

/// Cleanup progress as an indicatif bar over the requested paths.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

impl ExecutionReporter for CliReporter {
    fn on_start(&self, total_paths: usize) {
        let pb = ProgressBar::new(total_paths as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} Cleaning [{bar:30.cyan/dim}] {pos}/{len} paths {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn on_path_done(&self, path: &Path, _bytes_freed: u64) {
        self.with_bar(|pb| {
            pb.set_message(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );
            pb.inc(1);
        });
    }

    fn on_error(&self, _path: &Path, message: &str) {
        self.with_bar(|pb| pb.println(format!("  \x1b[31m✗\x1b[0m {}", message)));
    }

    fn on_complete(&self, files_deleted: usize, bytes_freed: i64, duration_secs: f64) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
        eprintln!(
            "  \x1b[32m✓\x1b[0m Cleanup complete: {} files, {} bytes in {:.2}s",
            files_deleted, bytes_freed, duration_secs
        );
    }
}
