use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::PresetName;
use crate::models::{PipelineRun, ProgressEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
}

/// One background analysis started through the HTTP surface
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub preset: PresetName,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub progress: Vec<ProgressEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PipelineRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Session {
    fn new(preset: PresetName) -> Self {
        Self {
            id: Uuid::new_v4(),
            preset,
            status: SessionStatus::Running,
            created_at: Utc::now(),
            progress: Vec::new(),
            result: None,
            error: None,
        }
    }
}

/// Storage for analysis sessions, keyed by session id.
///
/// Handlers receive the store as injected state; each session is written by
/// exactly one background task.
pub trait SessionStore: Send + Sync {
    fn create(&self, preset: PresetName) -> Session;

    fn get(&self, id: Uuid) -> Option<Session>;

    /// Apply `f` to the session. Returns false if it does not exist.
    fn update(&self, id: Uuid, f: &mut dyn FnMut(&mut Session)) -> bool;

    fn delete(&self, id: Uuid) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutex-guarded map; sessions are lost when the process exits
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, preset: PresetName) -> Session {
        let session = Session::new(preset);
        self.lock().insert(session.id, session.clone());
        session
    }

    fn get(&self, id: Uuid) -> Option<Session> {
        self.lock().get(&id).cloned()
    }

    fn update(&self, id: Uuid, f: &mut dyn FnMut(&mut Session)) -> bool {
        match self.lock().get_mut(&id) {
            Some(session) => {
                f(session);
                true
            }
            None => false,
        }
    }

    fn delete(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}
