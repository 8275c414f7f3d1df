pub mod fallback;
pub mod ground_truth;
pub mod heuristics;
pub mod triage;

pub use ground_truth::{GroundTruth, GroundTruthRule};
pub use heuristics::Heuristics;
pub use triage::{triage, TriageOutcome, TriageSignals};
