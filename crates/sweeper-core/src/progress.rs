use std::path::Path;

/// Trait for reporting cleanup progress.
///
/// The CLI implements it with indicatif. All methods have default no-op implementations.
pub trait ExecutionReporter: Send + Sync {
    fn on_start(&self, _total_paths: usize) {}
    fn on_path_done(&self, _path: &Path, _bytes_freed: u64) {}
    fn on_error(&self, _path: &Path, _message: &str) {}
    fn on_complete(&self, _files_deleted: usize, _bytes_freed: i64, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ExecutionReporter for SilentReporter {}
