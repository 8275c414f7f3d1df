use glob::{MatchOptions, Pattern};
use std::path::Path;
use tracing::error;

use crate::config::{AppConfig, HeuristicsConfig};
use crate::journal::record::normalize_for_matching;
use crate::journal::{ChangeRecord, ReasonFlags};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Path and size rules shared by the batcher and triage.
#[derive(Debug, Clone)]
pub struct Heuristics {
    heavy_write_bytes: u64,
    volatile_markers: Vec<String>,
    temp_markers: Vec<String>,
    ignore_patterns: Vec<Pattern>,
}

impl Heuristics {
    pub fn new(config: &HeuristicsConfig, ignore_globs: &[String]) -> Self {
        let ignore_patterns = ignore_globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();

        Self {
            heavy_write_bytes: config.heavy_write_bytes,
            volatile_markers: lowercase_all(&config.volatile_markers),
            temp_markers: lowercase_all(&config.temp_markers),
            ignore_patterns,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.heuristics, &config.ignore_patterns)
    }

    pub fn heavy_write_bytes(&self) -> u64 {
        self.heavy_write_bytes
    }

    pub fn is_heavy(&self, size_bytes: u64) -> bool {
        size_bytes > self.heavy_write_bytes
    }

    /// True when a directory segment of `path` names a package or build cache.
    pub fn has_volatile_marker(&self, path: &str) -> bool {
        has_segment(path, &self.volatile_markers)
    }

    /// True for paths under a temp directory or with a temp-file extension.
    pub fn has_temp_marker(&self, path: &str) -> bool {
        has_segment(path, &self.temp_markers) || has_temp_extension(path)
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path_with(path, MATCH_OPTIONS))
    }

    /// Flush-time filter: a large data-extend write, a create, or a volatile/temp path.
    pub fn is_significant(&self, record: &ChangeRecord) -> bool {
        if record.reason.contains(ReasonFlags::DATA_EXTEND) && self.is_heavy(record.file_size_bytes)
        {
            return true;
        }
        if record.reason.contains(ReasonFlags::FILE_CREATE) {
            return true;
        }
        let path = record.normalized_path();
        self.has_volatile_marker(&path) || self.has_temp_marker(&path)
    }
}

impl Default for Heuristics {
    fn default() -> Self {
        Self::new(&HeuristicsConfig::default(), &[])
    }
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

fn has_segment(path: &str, markers: &[String]) -> bool {
    let normalized = normalize_for_matching(path);
    normalized
        .split('/')
        .any(|segment| markers.iter().any(|marker| segment == marker))
}

fn has_temp_extension(path: &str) -> bool {
    let normalized = normalize_for_matching(path);
    normalized.ends_with(".tmp") || normalized.ends_with(".temp") || normalized.ends_with('~')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::FileAttributes;
    use chrono::Utc;
    use std::path::PathBuf;

    fn record(path: &str, reason: ReasonFlags, size: u64) -> ChangeRecord {
        let full_path = PathBuf::from(path);
        ChangeRecord {
            usn: 1,
            file_reference: 1,
            parent_reference: 1,
            file_name: full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            full_path,
            reason,
            file_size_bytes: size,
            timestamp: Utc::now(),
            attributes: FileAttributes::default(),
        }
    }

    #[test]
    fn test_volatile_marker_is_case_insensitive() {
        let h = Heuristics::default();
        assert!(h.has_volatile_marker(r"C:\Dev\App\Node_Modules\left-pad\index.js"));
        assert!(h.has_volatile_marker("/home/dev/.npm/_cacache/x"));
        assert!(!h.has_volatile_marker("/home/dev/pipeline/readme.md"));
    }

    #[test]
    fn test_temp_marker_matches_dirs_and_extensions() {
        let h = Heuristics::default();
        assert!(h.has_temp_marker(r"C:\Users\dev\AppData\Local\Temp\setup.log"));
        assert!(h.has_temp_marker("/data/report.docx.tmp"));
        assert!(!h.has_temp_marker("/data/templates/report.docx"));
    }

    #[test]
    fn test_significance_rules() {
        let h = Heuristics::default();
        let big = 600 * 1024 * 1024;
        assert!(h.is_significant(&record("/data/video.mkv", ReasonFlags::DATA_EXTEND, big)));
        assert!(!h.is_significant(&record("/data/video.mkv", ReasonFlags::DATA_EXTEND, 1024)));
        assert!(!h.is_significant(&record("/data/video.mkv", ReasonFlags::DATA_OVERWRITE, big)));
        assert!(h.is_significant(&record("/data/new.txt", ReasonFlags::FILE_CREATE, 0)));
        assert!(h.is_significant(&record("/p/node_modules/x.js", ReasonFlags::CLOSE, 10)));
        assert!(!h.is_significant(&record("/docs/notes.md", ReasonFlags::CLOSE, 10)));
    }

    #[test]
    fn test_ignore_patterns() {
        let h = Heuristics::new(
            &HeuristicsConfig::default(),
            &["**/$Recycle.Bin/**".to_string(), "[".to_string()],
        );
        assert!(h.is_ignored(Path::new("C:/$RECYCLE.BIN/S-1-5/file.txt")));
        assert!(!h.is_ignored(Path::new("C:/Users/file.txt")));
    }
}
