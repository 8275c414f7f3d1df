//! Local classifier used when the suggestion service is unavailable.

use std::path::{Path, PathBuf};

use crate::journal::record::normalize_for_matching;
use crate::orchestrator::CleanupSuggestion;

#[derive(Debug, Clone, Copy)]
enum Matcher {
    Extension(&'static [&'static str]),
    DirectorySegment(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    matcher: Matcher,
    category: &'static str,
    reason: &'static str,
    auto_approve: bool,
    confidence: f32,
}

// First match wins.
const RULES: &[Rule] = &[
    Rule {
        matcher: Matcher::Extension(&["tmp", "temp"]),
        category: "TempFile",
        reason: "Temporary file",
        auto_approve: true,
        confidence: 0.9,
    },
    Rule {
        matcher: Matcher::Extension(&["bak", "old", "dmp"]),
        category: "Backup",
        reason: "Backup copy or crash dump",
        auto_approve: false,
        confidence: 0.6,
    },
    Rule {
        matcher: Matcher::Extension(&["log", "etl"]),
        category: "Log",
        reason: "Log file",
        auto_approve: false,
        confidence: 0.7,
    },
    Rule {
        matcher: Matcher::DirectorySegment(&[
            "node_modules",
            ".npm",
            "npm-cache",
            ".yarn",
            ".pnpm-store",
            "__pycache__",
            ".nuget",
            ".gradle",
            "pip",
        ]),
        category: "PackageCache",
        reason: "Package manager cache, restored on next install",
        auto_approve: false,
        confidence: 0.8,
    },
    Rule {
        matcher: Matcher::DirectorySegment(&["temp", "tmp"]),
        category: "TempDirectory",
        reason: "File inside a temporary directory",
        auto_approve: true,
        confidence: 0.85,
    },
    Rule {
        matcher: Matcher::DirectorySegment(&["cache", ".cache", "caches"]),
        category: "Cache",
        reason: "Application cache",
        auto_approve: false,
        confidence: 0.7,
    },
];

impl Matcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Extension(extensions) => extension_of(path)
                .map(|ext| extensions.contains(&ext))
                .unwrap_or(false),
            Matcher::DirectorySegment(names) => {
                let mut segments: Vec<&str> = path.split('/').collect();
                // Only parent directories count, not the file name itself.
                segments.pop();
                segments.iter().any(|segment| names.contains(segment))
            }
        }
    }
}

fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Classify one file. Files no rule matches produce no suggestion.
pub fn classify(path: &Path, size_bytes: u64) -> Option<CleanupSuggestion> {
    let normalized = normalize_for_matching(&path.to_string_lossy());
    let rule = RULES.iter().find(|rule| rule.matcher.matches(&normalized))?;
    Some(CleanupSuggestion {
        file_path: path.to_path_buf(),
        size_bytes,
        category: rule.category.to_string(),
        safe_to_delete: true,
        reason: rule.reason.to_string(),
        auto_approve: rule.auto_approve,
        confidence: rule.confidence,
    })
}

/// Classify every file of a group, keeping only matches.
pub fn classify_all<'a, I>(files: I) -> Vec<CleanupSuggestion>
where
    I: IntoIterator<Item = (&'a PathBuf, u64)>,
{
    files
        .into_iter()
        .filter_map(|(path, size)| classify(path, size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_extension_is_auto_approved() {
        let s = classify(Path::new(r"C:\work\build.tmp"), 10).unwrap();
        assert_eq!(s.category, "TempFile");
        assert!(s.safe_to_delete);
        assert!(s.auto_approve);
    }

    #[test]
    fn test_backups_and_dumps_need_approval() {
        let s = classify(Path::new(r"C:\Users\me\Documents\thesis.bak"), 600).unwrap();
        assert_eq!(s.category, "Backup");
        assert!(!s.auto_approve);
        let s = classify(Path::new("/var/crash/app.dmp"), 1).unwrap();
        assert!(!s.auto_approve);
    }

    #[test]
    fn test_package_cache_requires_approval() {
        let s = classify(Path::new("/proj/node_modules/big.bin"), 600).unwrap();
        assert_eq!(s.category, "PackageCache");
        assert!(!s.auto_approve);
        assert_eq!(s.size_bytes, 600);
    }

    #[test]
    fn test_first_rule_wins() {
        // A log inside node_modules is classified by extension first.
        let s = classify(Path::new("/proj/node_modules/npm-debug.log"), 1).unwrap();
        assert_eq!(s.category, "Log");
    }

    #[test]
    fn test_temp_directory_and_cache() {
        let s = classify(Path::new(r"C:\Users\me\AppData\Local\Temp\setup.exe"), 1).unwrap();
        assert_eq!(s.category, "TempDirectory");
        let s = classify(Path::new("/home/me/.cache/thumb.png"), 1).unwrap();
        assert_eq!(s.category, "Cache");
    }

    #[test]
    fn test_unmatched_file_gives_nothing() {
        assert!(classify(Path::new("/home/me/documents/thesis.docx"), 1).is_none());
        // Directory names match only as parents.
        assert!(classify(Path::new("/home/me/tmp"), 1).is_none());
        assert!(classify(Path::new("/home/me/.tmp"), 1).is_none());
    }
}
