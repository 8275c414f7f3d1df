use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// How a session left the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    Executed,
    Rejected,
    NoSuggestions,
}

impl ReportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportOutcome::Executed => "executed",
            ReportOutcome::Rejected => "rejected",
            ReportOutcome::NoSuggestions => "no_suggestions",
        }
    }
}

impl fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executed" => Ok(ReportOutcome::Executed),
            "rejected" => Ok(ReportOutcome::Rejected),
            "no_suggestions" => Ok(ReportOutcome::NoSuggestions),
            other => Err(format!("unknown report outcome '{}'", other)),
        }
    }
}

/// One audited session, as stored in `cleanup_report`.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub id: i64,
    pub session_id: String,
    pub scope: String,
    pub outcome: ReportOutcome,
    pub user_approved: bool,
    pub suggestion_count: i64,
    pub files_deleted: i64,
    pub bytes_freed: i64,
    pub errors: Vec<String>,
    pub created_at: String,
    pub completed_at: String,
}
