pub mod activity;
pub mod analysis;
pub mod batcher;
pub mod brain;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod journal;
pub mod orchestrator;
pub mod platform;
pub mod progress;
pub mod storage;

pub use config::AppConfig;
pub use engine::{MonitorEngine, MonitorStats};
pub use error::{Error, Result};
pub use executor::{CleanupExecutionResult, CleanupExecutor};
pub use orchestrator::{AnalysisSession, AnalyzeNowOutcome, Orchestrator, ProposalOutcome, SessionState};
pub use progress::{ExecutionReporter, SilentReporter};
