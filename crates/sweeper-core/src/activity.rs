use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::orchestrator::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Triage,
    Proposal,
    Approval,
    Rejection,
    Execution,
    Report,
    Monitor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub event_type: ActivityKind,
    pub scope: String,
    pub state: Option<SessionState>,
    pub message: String,
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(event_type: ActivityKind, scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type,
            scope: scope.into(),
            state: None,
            message: message.into(),
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

struct Inner {
    recent: Mutex<VecDeque<ActivityEvent>>,
    capacity: usize,
    live: broadcast::Sender<ActivityEvent>,
}

/// Fan-out of workflow activity: a bounded history plus live subscribers.
/// Publishing never fails and never blocks on consumers.
#[derive(Clone)]
pub struct ActivityPublisher {
    inner: Arc<Inner>,
}

impl ActivityPublisher {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (live, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                recent: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                live,
            }),
        }
    }

    pub fn publish(&self, event: ActivityEvent) {
        trace!("activity {:?} [{}] {}", event.event_type, event.scope, event.message);
        {
            let mut recent = self.inner.recent.lock();
            if recent.len() == self.inner.capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        // No subscribers is fine.
        let _ = self.inner.live.send(event);
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<ActivityEvent> {
        self.inner.recent.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.recent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.inner.live.subscribe()
    }
}

impl Default for ActivityPublisher {
    fn default() -> Self {
        Self::new(500)
    }
}
