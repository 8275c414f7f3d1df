use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::executor::CleanupExecutionResult;
use crate::journal::{ChangeRecord, ReasonFlags};

/// Workflow position of a session. `Idle` is never stored: a session that
/// reaches it is removed from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Triage,
    Proposal,
    Approval,
    Execution,
    Report,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Triage => "triage",
            SessionState::Proposal => "proposal",
            SessionState::Approval => "approval",
            SessionState::Execution => "execution",
            SessionState::Report => "report",
        };
        write!(f, "{}", name)
    }
}

/// A file that triggered a session, either from the journal or a manual scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub reason: ReasonFlags,
    pub timestamp: DateTime<Utc>,
}

impl From<&ChangeRecord> for FileEvent {
    fn from(record: &ChangeRecord) -> Self {
        Self {
            path: record.full_path.clone(),
            size_bytes: record.file_size_bytes,
            reason: record.reason,
            timestamp: record.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSuggestion {
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub category: String,
    pub safe_to_delete: bool,
    pub reason: String,
    pub auto_approve: bool,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: Uuid,
    pub state: SessionState,
    pub trigger_events: Vec<FileEvent>,
    pub suggestions: Vec<CleanupSuggestion>,
    pub requires_user_approval: bool,
    pub user_approved: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scope: String,
    /// Outcome of items already executed through partial completion.
    pub partial_result: Option<CleanupExecutionResult>,
}

impl AnalysisSession {
    /// New session waiting for its proposal.
    pub fn new(scope: impl Into<String>, trigger_events: Vec<FileEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Proposal,
            trigger_events,
            suggestions: Vec::new(),
            requires_user_approval: false,
            user_approved: false,
            created_at: Utc::now(),
            completed_at: None,
            scope: scope.into(),
            partial_result: None,
        }
    }

    /// Bytes the safe suggestions would free.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.suggestions
            .iter()
            .filter(|s| s.safe_to_delete)
            .map(|s| s.size_bytes)
            .sum()
    }

    /// Paths handed to the executor: safe suggestions only, first occurrence wins.
    pub fn deletable_paths(&self) -> Vec<PathBuf> {
        deletable_paths(&self.suggestions)
    }
}

pub(crate) fn deletable_paths(suggestions: &[CleanupSuggestion]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    suggestions
        .iter()
        .filter(|s| s.safe_to_delete)
        .filter(|s| seen.insert(s.file_path.clone()))
        .map(|s| s.file_path.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(path: &str, safe: bool, size: u64) -> CleanupSuggestion {
        CleanupSuggestion {
            file_path: PathBuf::from(path),
            size_bytes: size,
            category: "Cache".to_string(),
            safe_to_delete: safe,
            reason: String::new(),
            auto_approve: false,
            confidence: 0.5,
        }
    }

    #[test]
    fn test_deletable_paths_filters_and_dedupes() {
        let mut session = AnalysisSession::new("test", vec![]);
        session.suggestions = vec![
            suggestion("/a", true, 10),
            suggestion("/b", false, 20),
            suggestion("/a", true, 10),
            suggestion("/c", true, 5),
        ];
        assert_eq!(
            session.deletable_paths(),
            vec![PathBuf::from("/a"), PathBuf::from("/c")]
        );
        assert_eq!(session.reclaimable_bytes(), 25);
    }

    #[test]
    fn test_new_session_waits_for_proposal() {
        let session = AnalysisSession::new("manual:test", vec![]);
        assert_eq!(session.state, SessionState::Proposal);
        assert!(!session.user_approved);
        assert!(session.completed_at.is_none());
    }

    #[test]
    fn test_suggestion_wire_names() {
        let json = serde_json::to_value(suggestion("/x", true, 1)).unwrap();
        assert!(json.get("safeToDelete").is_some());
        assert!(json.get("autoApprove").is_some());
        assert!(json.get("filePath").is_some());
    }
}
