//! Session workflow: Triage → Proposal → Approval → Execution → Report.
//!
//! Sessions live in one table behind one lock. Every state change is a
//! single read-modify-write under that lock, and the lock is released before
//! the suggestion service is called and before files are deleted. A session
//! leaves the table when it is reported, rejected, or ends with nothing to
//! suggest.

pub mod session;
mod table;

pub use session::{AnalysisSession, CleanupSuggestion, FileEvent, SessionState};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::activity::{ActivityEvent, ActivityKind, ActivityPublisher};
use crate::analysis::{fallback, triage, GroundTruth, Heuristics};
use crate::batcher::{BatchSink, EventBatch};
use crate::brain::{SuggestionProvider, SuggestionRequest};
use crate::config::{non_overlapping_directories, AppConfig};
use crate::error::{Error, Result};
use crate::executor::{CleanupExecutionResult, CleanupExecutor};
use crate::journal::ReasonFlags;
use crate::storage::{CleanupReport, Database, ReportOutcome};
use table::SessionTable;

/// What `generate_proposal` did with a session.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalOutcome {
    /// Nothing to suggest; the session was removed.
    NoSuggestions,
    /// Waiting for `approve`, `reject` or `complete_items`.
    AwaitingApproval { suggestions: usize },
    /// Every suggestion was auto-approved and has been executed.
    AutoExecuted(CleanupExecutionResult),
    /// The session was rejected while suggestions were being gathered.
    Withdrawn,
}

/// `folders_processed` is zero whenever the request was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeNowOutcome {
    pub accepted: bool,
    pub session_id: Option<Uuid>,
    pub folders_processed: usize,
}

pub struct Orchestrator {
    sessions: SessionTable,
    heuristics: Arc<Heuristics>,
    ground_truth: GroundTruth,
    brain: Option<Arc<dyn SuggestionProvider>>,
    brain_timeout: Duration,
    executor: CleanupExecutor,
    reports: Option<Arc<Mutex<Database>>>,
    activity: ActivityPublisher,
    max_files_per_folder: usize,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, heuristics: Arc<Heuristics>) -> Self {
        Self {
            sessions: SessionTable::new(),
            heuristics,
            ground_truth: GroundTruth::new(&config.ground_truth),
            brain: None,
            brain_timeout: config.brain.timeout(),
            executor: CleanupExecutor::default(),
            reports: None,
            activity: ActivityPublisher::new(config.orchestrator.activity_capacity),
            max_files_per_folder: config.orchestrator.max_files_per_folder.max(1),
        }
    }

    pub fn with_brain(mut self, brain: Arc<dyn SuggestionProvider>) -> Self {
        self.brain = Some(brain);
        self
    }

    pub fn with_brain_timeout(mut self, timeout: Duration) -> Self {
        self.brain_timeout = timeout;
        self
    }

    pub fn with_executor(mut self, executor: CleanupExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_report_store(mut self, db: Arc<Mutex<Database>>) -> Self {
        self.reports = Some(db);
        self
    }

    pub fn with_activity(mut self, activity: ActivityPublisher) -> Self {
        self.activity = activity;
        self
    }

    pub fn activity(&self) -> &ActivityPublisher {
        &self.activity
    }

    /// Snapshot of every live session, oldest first.
    pub fn get_pending_analyses(&self) -> Vec<AnalysisSession> {
        self.sessions.snapshot()
    }

    pub fn session(&self, id: Uuid) -> Option<AnalysisSession> {
        self.sessions.get(id)
    }

    pub fn pending_count(&self) -> usize {
        self.sessions.len()
    }

    // ── Triage ───────────────────────────────────────────────────

    /// Triage a flushed batch. Returns the new session waiting for its proposal,
    /// or `None` when nothing in the batch is worth analysing.
    pub fn process_events(&self, batch: &EventBatch) -> Option<Uuid> {
        let outcome = triage(&batch.records, &self.heuristics);
        if outcome.triggers.is_empty() {
            debug!(
                "Triage discarded batch of {} records ({} significant)",
                batch.records.len(),
                batch.significant.len()
            );
            return None;
        }

        let scope = format!("journal:{}", outcome.signals);
        let session = AnalysisSession::new(scope.clone(), outcome.triggers);
        let id = session.id;
        let trigger_count = session.trigger_events.len();
        self.sessions.insert(session);

        info!("Session {} opened ({}): {} trigger files", id, scope, trigger_count);
        self.activity.publish(
            ActivityEvent::new(
                ActivityKind::Triage,
                scope,
                format!("{} files triggered analysis", trigger_count),
            )
            .with_state(SessionState::Proposal)
            .with_meta("sessionId", id)
            .with_meta("batchRecords", batch.records.len()),
        );
        Some(id)
    }

    // ── Proposal ─────────────────────────────────────────────────

    pub async fn generate_proposal(&self, id: Uuid) -> Result<ProposalOutcome> {
        let (events, scope) = self.sessions.transition(id, SessionState::Proposal, |s| {
            (s.trigger_events.clone(), s.scope.clone())
        })?;

        let mut suggestions = match self.request_suggestions(id, &scope, &events).await {
            Some(suggestions) if !suggestions.is_empty() => suggestions,
            _ => {
                debug!("Session {}: using local classifier", id);
                fallback::classify_all(events.iter().map(|e| (&e.path, e.size_bytes)))
            }
        };
        suggestions.retain(|s| !self.heuristics.is_ignored(&s.file_path));
        self.ground_truth.apply_all(&mut suggestions);

        enum Next {
            Removed(AnalysisSession),
            Approval(usize, u64),
            Execute(Vec<PathBuf>),
        }

        let next = self.sessions.with_lock(|sessions| {
            let Some(session) = sessions.get_mut(&id) else {
                return Ok(None);
            };
            if session.state != SessionState::Proposal {
                return Err(Error::InvalidState {
                    id,
                    state: session.state,
                    expected: SessionState::Proposal,
                });
            }
            if suggestions.is_empty() {
                return Ok(sessions.remove(&id).map(Next::Removed));
            }
            session.requires_user_approval = suggestions.iter().any(|s| !s.auto_approve);
            session.suggestions = suggestions;
            if session.requires_user_approval {
                session.state = SessionState::Approval;
                Ok(Some(Next::Approval(
                    session.suggestions.len(),
                    session.reclaimable_bytes(),
                )))
            } else {
                session.state = SessionState::Execution;
                Ok(Some(Next::Execute(session.deletable_paths())))
            }
        })?;

        match next {
            None => {
                info!("Session {} was rejected before its proposal completed", id);
                Ok(ProposalOutcome::Withdrawn)
            }
            Some(Next::Removed(mut session)) => {
                info!("Session {}: nothing to clean up", id);
                session.completed_at = Some(Utc::now());
                self.activity.publish(
                    ActivityEvent::new(ActivityKind::Proposal, &session.scope, "No cleanup suggestions")
                        .with_state(SessionState::Idle)
                        .with_meta("sessionId", id),
                );
                self.store_report(&session, ReportOutcome::NoSuggestions, None);
                Ok(ProposalOutcome::NoSuggestions)
            }
            Some(Next::Approval(count, bytes)) => {
                info!(
                    "Session {}: {} suggestions ({} bytes) awaiting approval",
                    id, count, bytes
                );
                self.activity.publish(
                    ActivityEvent::new(
                        ActivityKind::Proposal,
                        &scope,
                        format!("{} suggestions awaiting approval", count),
                    )
                    .with_state(SessionState::Approval)
                    .with_meta("sessionId", id)
                    .with_meta("reclaimableBytes", bytes),
                );
                Ok(ProposalOutcome::AwaitingApproval { suggestions: count })
            }
            Some(Next::Execute(paths)) => {
                info!("Session {}: all suggestions auto-approved", id);
                self.activity.publish(
                    ActivityEvent::new(ActivityKind::Proposal, &scope, "Suggestions auto-approved")
                        .with_state(SessionState::Execution)
                        .with_meta("sessionId", id),
                );
                let result = self.execute_and_report(id, paths).await?;
                Ok(ProposalOutcome::AutoExecuted(result))
            }
        }
    }

    /// Ask the suggestion service about each parent folder. `None` when no
    /// service is configured or every request failed.
    async fn request_suggestions(
        &self,
        id: Uuid,
        scope: &str,
        events: &[FileEvent],
    ) -> Option<Vec<CleanupSuggestion>> {
        let brain = self.brain.clone()?;

        let mut groups: BTreeMap<PathBuf, Vec<&FileEvent>> = BTreeMap::new();
        for event in events {
            let folder = event
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| event.path.clone());
            groups.entry(folder).or_default().push(event);
        }
        let sizes: HashMap<PathBuf, u64> = events
            .iter()
            .map(|e| (e.path.clone(), e.size_bytes))
            .collect();

        let mut requests = JoinSet::new();
        for (folder, files) in groups {
            let request = SuggestionRequest {
                folder_path: folder.clone(),
                file_names: files
                    .iter()
                    .filter_map(|e| e.path.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect(),
                session_id: id,
                query_hint: scope.to_string(),
            };
            let brain = brain.clone();
            let timeout = self.brain_timeout;
            requests.spawn(async move {
                let outcome = tokio::time::timeout(timeout, brain.suggest(request)).await;
                (folder, outcome)
            });
        }

        let mut succeeded = 0usize;
        let mut suggestions = Vec::new();
        while let Some(joined) = requests.join_next().await {
            let (folder, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Suggestion request task failed: {}", e);
                    continue;
                }
            };
            match outcome {
                Ok(Ok(response)) => {
                    succeeded += 1;
                    debug!(
                        "Suggestions for {}: {} items, {}",
                        folder.display(),
                        response.items.len(),
                        response.reasoning
                    );
                    suggestions.extend(adopt_suggestions(&folder, response.items, &sizes));
                }
                Ok(Err(e)) => warn!("Suggestions for {} failed: {}", folder.display(), e),
                Err(_) => warn!(
                    "Suggestions for {} timed out after {:?}",
                    folder.display(),
                    self.brain_timeout
                ),
            }
        }

        if succeeded == 0 {
            None
        } else {
            Some(suggestions)
        }
    }

    // ── Approval ─────────────────────────────────────────────────

    /// Approve a session waiting in `Approval` and execute its safe suggestions.
    /// Only the first approve of a session executes anything.
    pub async fn approve(&self, id: Uuid) -> Result<CleanupExecutionResult> {
        let (scope, paths) = self.sessions.transition(id, SessionState::Approval, |s| {
            s.user_approved = true;
            s.state = SessionState::Execution;
            (s.scope.clone(), s.deletable_paths())
        })?;

        info!("Session {} approved: {} paths", id, paths.len());
        self.activity.publish(
            ActivityEvent::new(ActivityKind::Approval, scope, "Cleanup approved")
                .with_state(SessionState::Execution)
                .with_meta("sessionId", id)
                .with_meta("paths", paths.len()),
        );
        self.execute_and_report(id, paths).await
    }

    /// Drop a session that is waiting for a proposal or an approval.
    /// `Ok(false)` when the session is already gone.
    pub fn reject(&self, id: Uuid) -> Result<bool> {
        let removed = self.sessions.with_lock(|sessions| match sessions.get(&id) {
            None => Ok(None),
            Some(s) if matches!(s.state, SessionState::Approval | SessionState::Proposal) => {
                Ok(sessions.remove(&id))
            }
            Some(s) => Err(Error::InvalidState {
                id,
                state: s.state,
                expected: SessionState::Approval,
            }),
        })?;

        let Some(mut session) = removed else {
            debug!("Reject of unknown session {} ignored", id);
            return Ok(false);
        };

        info!("Session {} rejected", id);
        session.completed_at = Some(Utc::now());
        self.activity.publish(
            ActivityEvent::new(ActivityKind::Rejection, &session.scope, "Cleanup rejected")
                .with_state(SessionState::Idle)
                .with_meta("sessionId", id),
        );
        self.store_report(&session, ReportOutcome::Rejected, session.partial_result.as_ref());
        Ok(true)
    }

    /// Execute only the named suggestions of a session waiting for approval.
    ///
    /// The executed items leave the session. When none remain the session is
    /// reported and removed; otherwise it keeps waiting and accumulates the
    /// partial result. The session sits in `Execution` while the items run, so
    /// `approve`, `reject` and other partial runs wait their turn.
    pub async fn complete_items(
        &self,
        id: Uuid,
        paths: &[PathBuf],
    ) -> Result<CleanupExecutionResult> {
        let wanted: HashSet<&PathBuf> = paths.iter().collect();
        let (selected, finishing, scope) =
            self.sessions.transition(id, SessionState::Approval, |s| {
                let (selected, remaining): (Vec<_>, Vec<_>) = s
                    .suggestions
                    .drain(..)
                    .partition(|sugg| wanted.contains(&sugg.file_path));
                s.suggestions = remaining;
                let finishing = s.suggestions.is_empty();
                if finishing {
                    s.user_approved = true;
                }
                s.state = SessionState::Execution;
                (selected, finishing, s.scope.clone())
            })?;

        let selected_paths = session::deletable_paths(&selected);
        info!(
            "Session {}: completing {} of the requested items",
            id,
            selected_paths.len()
        );
        self.activity.publish(
            ActivityEvent::new(ActivityKind::Approval, &scope, "Partial cleanup approved")
                .with_state(SessionState::Execution)
                .with_meta("sessionId", id)
                .with_meta("paths", selected_paths.len()),
        );

        if finishing {
            return self.execute_and_report(id, selected_paths).await;
        }

        let result = self.run_executor(selected_paths).await;
        self.sessions.with_lock(|sessions| match sessions.get_mut(&id) {
            Some(session) => {
                session.state = SessionState::Approval;
                if let Ok(result) = &result {
                    match session.partial_result.as_mut() {
                        Some(partial) => partial.merge(result.clone()),
                        None => session.partial_result = Some(result.clone()),
                    }
                }
            }
            None => error!("Session {} vanished while its items were executing", id),
        });
        result
    }

    // ── Execution & Report ───────────────────────────────────────

    async fn run_executor(&self, paths: Vec<PathBuf>) -> Result<CleanupExecutionResult> {
        let executor = self.executor.clone();
        tokio::task::spawn_blocking(move || executor.execute(&paths))
            .await
            .map_err(|e| Error::Other(format!("Cleanup task failed: {}", e)))
    }

    async fn execute_and_report(
        &self,
        id: Uuid,
        paths: Vec<PathBuf>,
    ) -> Result<CleanupExecutionResult> {
        let result = self.run_executor(paths).await;

        let session = self.sessions.with_lock(|sessions| {
            let mut session = sessions.remove(&id)?;
            session.state = SessionState::Report;
            session.completed_at = Some(Utc::now());
            Some(session)
        });
        let mut session = session.ok_or(Error::SessionNotFound(id))?;

        let mut total = session.partial_result.take().unwrap_or_else(|| CleanupExecutionResult {
            success: true,
            ..Default::default()
        });
        match result {
            Ok(result) => total.merge(result),
            Err(e) => {
                total.errors.push(e.to_string());
                total.success = false;
            }
        }
        session.partial_result = Some(total.clone());

        self.activity.publish(
            ActivityEvent::new(
                ActivityKind::Execution,
                &session.scope,
                format!(
                    "{} files deleted, {} bytes freed",
                    total.files_deleted, total.bytes_freed
                ),
            )
            .with_state(SessionState::Report)
            .with_meta("sessionId", id)
            .with_meta("errors", total.errors.len()),
        );
        self.store_report(&session, ReportOutcome::Executed, Some(&total));
        self.activity.publish(
            ActivityEvent::new(
                ActivityKind::Report,
                &session.scope,
                if total.success {
                    "Cleanup completed"
                } else {
                    "Cleanup completed with errors"
                },
            )
            .with_state(SessionState::Idle)
            .with_meta("sessionId", id),
        );
        info!(
            "Session {} reported: {} files, {} bytes, success {}",
            id, total.files_deleted, total.bytes_freed, total.success
        );
        Ok(total)
    }

    fn store_report(
        &self,
        session: &AnalysisSession,
        outcome: ReportOutcome,
        result: Option<&CleanupExecutionResult>,
    ) {
        let Some(db) = &self.reports else {
            return;
        };
        let report = CleanupReport {
            id: 0,
            session_id: session.id.to_string(),
            scope: session.scope.clone(),
            outcome,
            user_approved: session.user_approved,
            suggestion_count: session.suggestions.len() as i64,
            files_deleted: result.map(|r| r.files_deleted as i64).unwrap_or(0),
            bytes_freed: result.map(|r| r.bytes_freed).unwrap_or(0),
            errors: result.map(|r| r.errors.clone()).unwrap_or_default(),
            created_at: session.created_at.to_rfc3339(),
            completed_at: session
                .completed_at
                .unwrap_or_else(Utc::now)
                .to_rfc3339(),
        };
        if let Err(e) = db.lock().insert_report(&report) {
            error!("Failed to store report for session {}: {}", session.id, e);
        }
    }

    // ── Manual trigger ───────────────────────────────────────────

    /// Open a session over the direct children of `folders` and start its
    /// proposal in the background.
    pub fn analyze_now(self: &Arc<Self>, folders: &[String], reason: &str) -> AnalyzeNowOutcome {
        let roots = non_overlapping_directories(folders.to_vec());
        let cap = self.max_files_per_folder;
        let heuristics = self.heuristics.clone();

        let scanned: Vec<Option<Vec<FileEvent>>> = roots
            .par_iter()
            .map(|folder| enumerate_folder(Path::new(folder), cap, &heuristics))
            .collect();
        let folders_processed = scanned.iter().filter(|s| s.is_some()).count();
        let events: Vec<FileEvent> = scanned.into_iter().flatten().flatten().collect();

        if events.is_empty() {
            info!(
                "Manual analysis ({}) found nothing in {} folders",
                reason, folders_processed
            );
            return AnalyzeNowOutcome {
                accepted: false,
                session_id: None,
                folders_processed: 0,
            };
        }

        let scope = format!("manual:{}", reason);
        let session = AnalysisSession::new(scope.clone(), events);
        let id = session.id;
        let count = session.trigger_events.len();
        self.sessions.insert(session);
        self.activity.publish(
            ActivityEvent::new(
                ActivityKind::Triage,
                scope,
                format!("{} entries queued from {} folders", count, folders_processed),
            )
            .with_state(SessionState::Proposal)
            .with_meta("sessionId", id),
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let orchestrator = Arc::clone(self);
                handle.spawn(async move {
                    if let Err(e) = orchestrator.generate_proposal(id).await {
                        error!("Proposal for session {} failed: {}", id, e);
                    }
                });
            }
            Err(_) => warn!(
                "No async runtime; session {} waits for an explicit proposal",
                id
            ),
        }

        AnalyzeNowOutcome {
            accepted: true,
            session_id: Some(id),
            folders_processed,
        }
    }
}

#[async_trait]
impl BatchSink for Orchestrator {
    async fn handle_batch(&self, batch: EventBatch) -> Result<()> {
        if let Some(id) = self.process_events(&batch) {
            self.generate_proposal(id).await?;
        }
        Ok(())
    }
}

/// Direct children of `folder`, files and directories, up to `cap` entries.
/// `None` when the folder cannot be read.
fn enumerate_folder(folder: &Path, cap: usize, heuristics: &Heuristics) -> Option<Vec<FileEvent>> {
    if !folder.is_dir() {
        warn!("'{}' is not a readable directory", folder.display());
        return None;
    }

    let events = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping entry in '{}': {}", folder.display(), e);
                None
            }
        })
        .filter(|entry| !entry.path_is_symlink())
        .filter(|entry| !heuristics.is_ignored(entry.path()))
        .take(cap)
        .map(|entry| {
            let metadata = entry.metadata().ok();
            let size_bytes = metadata
                .as_ref()
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .unwrap_or(0);
            let timestamp = metadata
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            FileEvent {
                path: entry.into_path(),
                size_bytes,
                reason: ReasonFlags::default(),
                timestamp,
            }
        })
        .collect();
    Some(events)
}

/// Anchor the service's items to the folder they were requested for.
/// Relative paths are joined to the folder; anything outside it, or any path
/// with `..` in it, is dropped.
fn adopt_suggestions(
    folder: &Path,
    items: Vec<crate::brain::SuggestionItem>,
    sizes: &HashMap<PathBuf, u64>,
) -> Vec<CleanupSuggestion> {
    items
        .into_iter()
        .filter_map(|item| {
            let mut suggestion = CleanupSuggestion::from(item);
            let climbs = suggestion
                .file_path
                .components()
                .any(|c| matches!(c, Component::ParentDir));
            if suggestion.file_path.is_relative() {
                suggestion.file_path = folder.join(&suggestion.file_path);
            }
            if climbs || !suggestion.file_path.starts_with(folder) {
                warn!(
                    "Ignoring suggestion outside {}: {}",
                    folder.display(),
                    suggestion.file_path.display()
                );
                return None;
            }
            if suggestion.size_bytes == 0 {
                if let Some(size) = sizes.get(&suggestion.file_path) {
                    suggestion.size_bytes = *size;
                }
            }
            Some(suggestion)
        })
        .collect()
}
