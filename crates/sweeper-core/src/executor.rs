use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::progress::{ExecutionReporter, SilentReporter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupExecutionResult {
    pub success: bool,
    pub files_deleted: usize,
    pub bytes_freed: i64,
    pub errors: Vec<String>,
}

impl CleanupExecutionResult {
    /// Fold a later partial execution into this one.
    pub fn merge(&mut self, other: CleanupExecutionResult) {
        self.files_deleted += other.files_deleted;
        self.bytes_freed += other.bytes_freed;
        self.errors.extend(other.errors);
        self.success = self.errors.is_empty();
    }
}

/// Filesystem removal primitives used by the executor.
pub trait DeletionBackend: Send + Sync {
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
}

/// Permanent deletion through `std::fs`.
pub struct StdBackend;

impl DeletionBackend for StdBackend {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }
}

/// Deletes files and directory trees, isolating each failure.
#[derive(Clone)]
pub struct CleanupExecutor {
    cancel: Arc<AtomicBool>,
    backend: Arc<dyn DeletionBackend>,
    reporter: Arc<dyn ExecutionReporter>,
}

impl Default for CleanupExecutor {
    fn default() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)))
    }
}

impl CleanupExecutor {
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            backend: Arc::new(StdBackend),
            reporter: Arc::new(SilentReporter),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn DeletionBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ExecutionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Delete every path. Missing paths are skipped; cancellation stops the run
    /// and is recorded as one error.
    pub fn execute(&self, paths: &[PathBuf]) -> CleanupExecutionResult {
        let start = Instant::now();
        let mut run = Run::default();
        self.reporter.on_start(paths.len());

        for path in paths {
            if self.is_cancelled() {
                run.cancelled();
                break;
            }

            let before = run.bytes_freed;
            let metadata = match fs::symlink_metadata(path) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    info!("'{}' no longer exists, skipping", path.display());
                    continue;
                }
                Err(e) => {
                    self.record_failure(&mut run, path, "stat", &e);
                    continue;
                }
            };

            if metadata.is_dir() {
                self.delete_directory(&mut run, path);
            } else {
                self.delete_file(&mut run, path, metadata.len());
            }
            if run.stopped {
                break;
            }
            self.reporter
                .on_path_done(path, (run.bytes_freed - before).max(0) as u64);
        }

        let result = CleanupExecutionResult {
            success: run.errors.is_empty(),
            files_deleted: run.files_deleted,
            bytes_freed: run.bytes_freed,
            errors: run.errors,
        };
        let duration = start.elapsed().as_secs_f64();
        self.reporter
            .on_complete(result.files_deleted, result.bytes_freed, duration);
        info!(
            "Cleanup executed in {:.2}s: {} files deleted, {} bytes freed, {} errors",
            duration,
            result.files_deleted,
            result.bytes_freed,
            result.errors.len()
        );
        result
    }

    fn delete_file(&self, run: &mut Run, path: &Path, size: u64) {
        match self.backend.remove_file(path) {
            Ok(()) => {
                debug!("deleted: {}", path.display());
                run.files_deleted += 1;
                run.bytes_freed += size as i64;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("'{}' vanished before deletion", path.display());
            }
            Err(e) => self.record_failure(run, path, "delete", &e),
        }
    }

    /// Files first, then subdirectories bottom-up, then the root.
    fn delete_directory(&self, run: &mut Run, root: &Path) {
        let errors_before = run.errors.len();

        for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
            if self.is_cancelled() {
                run.cancelled();
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    let message = format!("Failed to walk '{}': {}", path.display(), e);
                    error!("{}", message);
                    self.reporter.on_error(&path, &message);
                    run.errors.push(message);
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                if let Err(e) = self.backend.remove_dir(entry.path()) {
                    warn!("Could not remove directory '{}': {}", entry.path().display(), e);
                }
            } else {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                self.delete_file(run, entry.path(), size);
            }
        }

        match self.backend.remove_dir(root) {
            Ok(()) => debug!("removed directory: {}", root.display()),
            // A failure inside the tree already explains why the root stays.
            Err(e) if run.errors.len() > errors_before => {
                warn!("Directory '{}' kept: {}", root.display(), e);
            }
            Err(e) => self.record_failure(run, root, "remove directory", &e),
        }
    }

    fn record_failure(&self, run: &mut Run, path: &Path, action: &str, e: &io::Error) {
        let message = format!("Failed to {} '{}': {}", action, path.display(), e);
        error!("{}", message);
        self.reporter.on_error(path, &message);
        run.errors.push(message);
    }
}

#[derive(Default)]
struct Run {
    files_deleted: usize,
    bytes_freed: i64,
    errors: Vec<String>,
    stopped: bool,
}

impl Run {
    fn cancelled(&mut self) {
        if !self.stopped {
            warn!("Cleanup cancelled");
            self.errors.push("Cleanup cancelled".to_string());
            self.stopped = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    struct FailingBackend {
        fail_name: &'static str,
    }

    impl DeletionBackend for FailingBackend {
        fn remove_file(&self, path: &Path) -> io::Result<()> {
            if path.file_name().map(|n| n == self.fail_name).unwrap_or(false) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            fs::remove_file(path)
        }

        fn remove_dir(&self, path: &Path) -> io::Result<()> {
            fs::remove_dir(path)
        }
    }

    fn write_file(path: &Path, bytes: usize) {
        let mut f = File::create(path).unwrap();
        f.write_all(&vec![7u8; bytes]).unwrap();
    }

    #[test]
    fn test_deletes_files_and_counts_bytes() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.tmp");
        let b = dir.path().join("b.tmp");
        write_file(&a, 100);
        write_file(&b, 50);

        let result = CleanupExecutor::default().execute(&[a.clone(), b.clone()]);
        assert!(result.success);
        assert_eq!(result.files_deleted, 2);
        assert_eq!(result.bytes_freed, 150);
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn test_missing_path_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let result = CleanupExecutor::default().execute(&[dir.path().join("ghost")]);
        assert!(result.success);
        assert_eq!(result.files_deleted, 0);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_directory_tree_removed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("node_modules");
        fs::create_dir_all(root.join("pkg/lib")).unwrap();
        write_file(&root.join("pkg/index.js"), 10);
        write_file(&root.join("pkg/lib/util.js"), 20);

        let result = CleanupExecutor::default().execute(&[root.clone()]);
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.files_deleted, 2);
        assert_eq!(result.bytes_freed, 30);
        assert!(!root.exists());
    }

    #[test]
    fn test_failure_inside_directory_recorded_once() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        fs::create_dir_all(&root).unwrap();
        write_file(&root.join("ok.bin"), 10);
        write_file(&root.join("locked.bin"), 10);

        let executor =
            CleanupExecutor::default().with_backend(Arc::new(FailingBackend { fail_name: "locked.bin" }));
        let result = executor.execute(&[root.clone()]);
        assert!(!result.success);
        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.bytes_freed, 10);
        assert_eq!(result.errors.len(), 1);
        assert!(root.join("locked.bin").exists());
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.tmp");
        write_file(&a, 1);

        let cancel = Arc::new(AtomicBool::new(true));
        let result = CleanupExecutor::new(cancel).execute(&[a.clone()]);
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Cleanup cancelled".to_string()]);
        assert!(a.exists());
    }

    #[test]
    fn test_merge_accumulates() {
        let mut total = CleanupExecutionResult {
            success: true,
            files_deleted: 2,
            bytes_freed: 20,
            errors: vec![],
        };
        total.merge(CleanupExecutionResult {
            success: false,
            files_deleted: 1,
            bytes_freed: 5,
            errors: vec!["boom".to_string()],
        });
        assert_eq!(total.files_deleted, 3);
        assert_eq!(total.bytes_freed, 25);
        assert!(!total.success);
    }
}
