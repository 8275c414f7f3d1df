use super::models::*;
use super::sqlite::Database;
use rusqlite::types::Type;
use rusqlite::{params, Result, Row};
use tracing::debug;

impl Database {
    // ── Cleanup Report ───────────────────────────────────────────

    /// Store a report. A second report for the same session is ignored.
    pub fn insert_report(&self, report: &CleanupReport) -> Result<bool> {
        let errors_json = serde_json::to_string(&report.errors).unwrap_or_else(|_| "[]".to_string());
        let inserted = self.connection().execute(
            "INSERT OR IGNORE INTO cleanup_report \
             (session_id, scope, outcome, user_approved, suggestion_count, \
              files_deleted, bytes_freed, errors, created_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                report.session_id,
                report.scope,
                report.outcome.as_str(),
                report.user_approved,
                report.suggestion_count,
                report.files_deleted,
                report.bytes_freed,
                errors_json,
                report.created_at,
                report.completed_at,
            ],
        )?;
        debug!(
            "Report for session {} stored: {}",
            report.session_id,
            inserted > 0
        );
        Ok(inserted > 0)
    }

    /// Newest first.
    pub fn recent_reports(&self, limit: i64) -> Result<Vec<CleanupReport>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, session_id, scope, outcome, user_approved, suggestion_count, \
             files_deleted, bytes_freed, errors, created_at, completed_at \
             FROM cleanup_report ORDER BY completed_at DESC, id DESC LIMIT ?1",
        )?;
        let reports = stmt
            .query_map(params![limit], report_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(reports)
    }

    pub fn report_for_session(&self, session_id: &str) -> Result<Option<CleanupReport>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, session_id, scope, outcome, user_approved, suggestion_count, \
             files_deleted, bytes_freed, errors, created_at, completed_at \
             FROM cleanup_report WHERE session_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![session_id], report_from_row)?;
        rows.next().transpose()
    }

    /// (reports, total bytes freed)
    pub fn report_summary(&self) -> Result<(i64, i64)> {
        self.connection().query_row(
            "SELECT COUNT(*), COALESCE(SUM(bytes_freed), 0) FROM cleanup_report",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
    }
}

fn report_from_row(row: &Row<'_>) -> Result<CleanupReport> {
    let outcome: String = row.get(3)?;
    let outcome = outcome.parse::<ReportOutcome>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
    })?;
    let errors_json: String = row.get(8)?;
    let errors: Vec<String> = serde_json::from_str(&errors_json).unwrap_or_default();

    Ok(CleanupReport {
        id: row.get(0)?,
        session_id: row.get(1)?,
        scope: row.get(2)?,
        outcome,
        user_approved: row.get(4)?,
        suggestion_count: row.get(5)?,
        files_deleted: row.get(6)?,
        bytes_freed: row.get(7)?,
        errors,
        created_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}
