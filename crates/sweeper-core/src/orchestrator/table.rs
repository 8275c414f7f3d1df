use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::session::{AnalysisSession, SessionState};
use crate::error::{Error, Result};

/// Every live session behind one lock. Callers get clones or run a closure
/// under the lock; the guard never escapes, so it cannot be held across an
/// `.await`.
#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: Mutex<HashMap<Uuid, AnalysisSession>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: AnalysisSession) {
        self.sessions.lock().insert(session.id, session);
    }

    pub fn get(&self, id: Uuid) -> Option<AnalysisSession> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn snapshot(&self) -> Vec<AnalysisSession> {
        let mut sessions: Vec<AnalysisSession> = self.sessions.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Run `f` on the session if it is currently in `expected`.
    pub fn transition<R>(
        &self,
        id: Uuid,
        expected: SessionState,
        f: impl FnOnce(&mut AnalysisSession) -> R,
    ) -> Result<R> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&id).ok_or(Error::SessionNotFound(id))?;
        if session.state != expected {
            return Err(Error::InvalidState {
                id,
                state: session.state,
                expected,
            });
        }
        Ok(f(session))
    }

    pub fn with_lock<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, AnalysisSession>) -> R) -> R {
        f(&mut self.sessions.lock())
    }
}
