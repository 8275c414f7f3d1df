use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::analysis::ground_truth::GroundTruthRule;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Drive letter of the monitored volume ("C", "C:" and "C:\" are all accepted).
    pub volume: String,
    /// Glob patterns for paths that never reach triage.
    pub ignore_patterns: Vec<String>,
    pub journal: JournalConfig,
    pub batcher: BatcherConfig,
    pub heuristics: HeuristicsConfig,
    pub brain: BrainConfig,
    pub orchestrator: OrchestratorConfig,
    pub ground_truth: Vec<GroundTruthRule>,
    /// SQLite file for the cleanup audit trail. Reports are not stored when unset.
    pub report_db: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            volume: "C".to_string(),
            ignore_patterns: Vec::new(),
            journal: JournalConfig::default(),
            batcher: BatcherConfig::default(),
            heuristics: HeuristicsConfig::default(),
            brain: BrainConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            ground_truth: Vec::new(),
            report_db: Some("sweeper.db".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Sleep after a read that returned no records.
    pub idle_delay_ms: u64,
    /// Back-off after a failed read or parse.
    pub error_backoff_ms: u64,
    /// Size of the buffer handed to each read call.
    pub read_buffer_bytes: usize,
    /// Upper bound on cached parent-directory paths before the cache is reset.
    pub directory_cache_entries: usize,
    /// Capacity of the channel between the reader thread and the batcher.
    pub channel_capacity: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            idle_delay_ms: 50,
            error_backoff_ms: 1_000,
            read_buffer_bytes: 64 * 1024,
            directory_cache_entries: 16_384,
            channel_capacity: 4_096,
        }
    }
}

impl JournalConfig {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    pub window_secs: u64,
    pub max_events: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            window_secs: 30,
            max_events: 1_000,
        }
    }
}

impl BatcherConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    pub heavy_write_bytes: u64,
    pub volatile_markers: Vec<String>,
    pub temp_markers: Vec<String>,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            heavy_write_bytes: 500 * 1024 * 1024,
            volatile_markers: [
                "node_modules",
                ".npm",
                "npm-cache",
                ".yarn",
                ".pnpm-store",
                "__pycache__",
                ".nuget",
                ".gradle",
                "pip",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            temp_markers: vec!["temp".to_string(), "tmp".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// Base URL of the suggestion service. Local heuristics are used when unset.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
        }
    }
}

impl BrainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Files enumerated per folder by a manual trigger.
    pub max_files_per_folder: usize,
    pub activity_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_files_per_folder: 200,
            activity_capacity: 500,
        }
    }
}

/// Load `Config.toml` (optional) overlaid with `SWEEPER__*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("SWEEPER").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;
        let result_clone = result.clone();

        for res_dir in &result_clone {
            let res_dir_path = Path::new(res_dir);

            if dir_path.starts_with(res_dir_path) {
                should_add = false;
                break;
            }

            if res_dir_path.starts_with(dir_path) {
                result.retain(|x| x != res_dir);
            }
        }

        if should_add {
            result.push(dir);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            "/home/user/downloads".to_string(),
            "/home/user/docs".to_string(),
            "/var/tmp".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            "/home/user".to_string(),
            "/home/user/docs".to_string(),
            "/var/tmp".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 2);
        assert!(result.contains(&"/home/user".to_string()));
        assert!(!result.contains(&"/home/user/docs".to_string()));
    }

    #[test]
    fn test_parent_listed_after_children_replaces_them() {
        let dirs = vec![
            "/proj/a/node_modules".to_string(),
            "/proj/b/node_modules".to_string(),
            "/proj".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result, vec!["/proj".to_string()]);
    }

    #[test]
    fn test_defaults_are_usable_without_a_file() {
        let config = AppConfig::default();
        assert_eq!(config.batcher.max_events, 1_000);
        assert_eq!(config.batcher.window(), Duration::from_secs(30));
        assert!(config.heuristics.heavy_write_bytes > 100 * 1024 * 1024);
        assert!(config.brain.url.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                "volume = \"D\"\n[batcher]\nmax_events = 10\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.volume, "D");
        assert_eq!(config.batcher.max_events, 10);
        assert_eq!(config.batcher.window_secs, 30);
        assert_eq!(config.orchestrator.max_files_per_folder, 200);
    }
}
