use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::tempdir;

use sweeper_core::analysis::Heuristics;
use sweeper_core::batcher::EventBatch;
use sweeper_core::journal::{ChangeRecord, FileAttributes, ReasonFlags};
use sweeper_core::storage::models::*;
use sweeper_core::storage::Database;
use sweeper_core::{AppConfig, Orchestrator};

fn make_report(session_id: &str, outcome: ReportOutcome, completed_at: &str) -> CleanupReport {
    CleanupReport {
        id: 0,
        session_id: session_id.to_string(),
        scope: "journal:volatile".to_string(),
        outcome,
        user_approved: outcome == ReportOutcome::Executed,
        suggestion_count: 2,
        files_deleted: if outcome == ReportOutcome::Executed { 2 } else { 0 },
        bytes_freed: if outcome == ReportOutcome::Executed { 2048 } else { 0 },
        errors: vec![],
        created_at: "2026-01-01T00:00:00+00:00".to_string(),
        completed_at: completed_at.to_string(),
    }
}

#[test]
fn test_schema_version_is_set() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.schema_version().unwrap(), 1);
}

#[test]
fn test_insert_and_list_newest_first() {
    let db = Database::open_in_memory().unwrap();
    db.insert_report(&make_report("s1", ReportOutcome::Executed, "2026-01-01T00:01:00+00:00"))
        .unwrap();
    db.insert_report(&make_report("s2", ReportOutcome::Rejected, "2026-01-01T00:02:00+00:00"))
        .unwrap();
    db.insert_report(&make_report(
        "s3",
        ReportOutcome::NoSuggestions,
        "2026-01-01T00:03:00+00:00",
    ))
    .unwrap();

    let reports = db.recent_reports(2).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].session_id, "s3");
    assert_eq!(reports[0].outcome, ReportOutcome::NoSuggestions);
    assert_eq!(reports[1].session_id, "s2");

    let (count, bytes) = db.report_summary().unwrap();
    assert_eq!(count, 3);
    assert_eq!(bytes, 2048);
}

#[test]
fn test_duplicate_session_is_ignored() {
    let db = Database::open_in_memory().unwrap();
    let report = make_report("same", ReportOutcome::Executed, "2026-01-01T00:01:00+00:00");
    assert!(db.insert_report(&report).unwrap());
    assert!(!db.insert_report(&report).unwrap());
    assert_eq!(db.recent_reports(10).unwrap().len(), 1);
}

#[test]
fn test_errors_round_trip_and_truncate() {
    let db = Database::open_in_memory().unwrap();
    let mut report = make_report("err", ReportOutcome::Executed, "2026-01-01T00:01:00+00:00");
    report.errors = vec!["Failed to delete 'x': in use".to_string()];
    db.insert_report(&report).unwrap();

    let stored = db.report_for_session("err").unwrap().unwrap();
    assert_eq!(stored.errors, report.errors);
    assert!(stored.user_approved);

    db.truncate_all().unwrap();
    assert!(db.report_for_session("err").unwrap().is_none());
}

#[test]
fn test_reports_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("audit.db");
    let path = path.to_string_lossy().into_owned();
    {
        let db = Database::open(&path).unwrap();
        db.insert_report(&make_report("kept", ReportOutcome::Rejected, "2026-01-01T00:01:00+00:00"))
            .unwrap();
    }
    let db = Database::open(&path).unwrap();
    assert!(db.report_for_session("kept").unwrap().is_some());
}

#[test]
fn test_rejection_is_audited_once() {
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    let orch = Orchestrator::new(&AppConfig::default(), Arc::new(Heuristics::default()))
        .with_report_store(db.clone());

    let record = ChangeRecord {
        usn: 1,
        file_reference: 2,
        parent_reference: 3,
        file_name: "cache.bin".to_string(),
        full_path: "/work/node_modules/cache.bin".into(),
        reason: ReasonFlags::FILE_CREATE,
        file_size_bytes: 10,
        timestamp: chrono::Utc::now(),
        attributes: FileAttributes::default(),
    };
    let batch = EventBatch::from_window(vec![record], &Heuristics::default());
    let id = orch.process_events(&batch).unwrap();

    assert!(orch.reject(id).unwrap());
    assert!(!orch.reject(id).unwrap());

    let reports = db.lock().recent_reports(10).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].session_id, id.to_string());
    assert_eq!(reports[0].outcome, ReportOutcome::Rejected);
    assert!(!reports[0].user_approved);
}

#[tokio::test]
async fn test_rejection_after_partial_cleanup_keeps_deletions() {
    let dir = tempdir().unwrap();
    let cache = dir.path().join("node_modules");
    std::fs::create_dir_all(&cache).unwrap();
    let a = cache.join("a.bin");
    let b = cache.join("b.bin");
    std::fs::write(&a, vec![0u8; 10]).unwrap();
    std::fs::write(&b, vec![0u8; 20]).unwrap();

    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    let orch = Orchestrator::new(&AppConfig::default(), Arc::new(Heuristics::default()))
        .with_report_store(db.clone());

    let records = [(&a, 10), (&b, 20)]
        .into_iter()
        .map(|(path, size)| ChangeRecord {
            usn: 1,
            file_reference: 2,
            parent_reference: 3,
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            full_path: path.clone(),
            reason: ReasonFlags::FILE_CREATE,
            file_size_bytes: size,
            timestamp: chrono::Utc::now(),
            attributes: FileAttributes::default(),
        })
        .collect();
    let batch = EventBatch::from_window(records, &Heuristics::default());
    let id = orch.process_events(&batch).unwrap();
    orch.generate_proposal(id).await.unwrap();

    let partial = orch.complete_items(id, &[a.clone()]).await.unwrap();
    assert_eq!(partial.files_deleted, 1);
    assert!(orch.reject(id).unwrap());

    let report = db.lock().report_for_session(&id.to_string()).unwrap().unwrap();
    assert_eq!(report.outcome, ReportOutcome::Rejected);
    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.bytes_freed, 10);
    assert!(b.exists());
}
