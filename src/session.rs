//! In-memory conversation sessions with idle expiry

use crate::clock::Clock;
use crate::llm::Role;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// One persisted conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Source attribution shown alongside answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub section: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
    pub user_preferences: Map<String, Value>,
    /// Nested `day_N -> slot -> {activities: [...]}` structure
    pub itinerary: Option<Value>,
    pub citations: Vec<Citation>,
    pub questions_asked: u32,
}

impl Session {
    fn new(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_accessed: now,
            history: Vec::new(),
            user_preferences: Map::new(),
            itinerary: None,
            citations: Vec::new(),
            questions_asked: 0,
        }
    }

    /// Append citations, skipping urls already present
    fn add_citations(&mut self, citations: Vec<Citation>) {
        for citation in citations {
            let duplicate = !citation.url.is_empty()
                && self.citations.iter().any(|c| c.url == citation.url);
            if !duplicate {
                self.citations.push(citation);
            }
        }
    }
}

/// Partial update applied by [`SessionStore::update`]
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    /// Merged key by key into the existing preferences
    pub user_preferences: Option<Map<String, Value>>,
    /// `Some(None)` clears the itinerary
    pub itinerary: Option<Option<Value>>,
    /// Replaces the citation list
    pub citations: Option<Vec<Citation>>,
}

/// Session mutation produced by a tool result
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    SetItinerary(Value),
    AddCitations(Vec<Citation>),
    QuestionAsked,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(timeout_minutes = timeout.num_minutes(), "Session store initialized");
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on a live session, refreshing its access time.
    /// Idle sessions are evicted here and reported as not found.
    fn with_session<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> T) -> SessionResult<T> {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(id) else {
            return Err(SessionError::NotFound(id.to_string()));
        };
        if now - session.last_accessed > self.timeout {
            sessions.remove(id);
            tracing::info!(session_id = %id, "Session expired");
            return Err(SessionError::NotFound(id.to_string()));
        }
        session.last_accessed = now;
        Ok(f(session))
    }

    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), self.clock.now());
        self.lock().insert(id.clone(), session);
        tracing::info!(session_id = %id, "Created session");
        id
    }

    pub fn get(&self, id: &str) -> SessionResult<Session> {
        self.with_session(id, |s| s.clone())
    }

    pub fn exists(&self, id: &str) -> bool {
        self.with_session(id, |_| ()).is_ok()
    }

    pub fn update(&self, id: &str, patch: SessionPatch) -> SessionResult<()> {
        self.with_session(id, |s| {
            if let Some(prefs) = patch.user_preferences {
                s.user_preferences.extend(prefs);
            }
            if let Some(itinerary) = patch.itinerary {
                s.itinerary = itinerary;
            }
            if let Some(citations) = patch.citations {
                s.citations = citations;
            }
        })
    }

    pub fn append_message(&self, id: &str, role: Role, content: impl Into<String>) -> SessionResult<()> {
        let now = self.clock.now();
        let content = content.into();
        self.with_session(id, |s| {
            s.history.push(HistoryEntry {
                role,
                content,
                timestamp: now,
            });
        })
    }

    /// The last `max` history entries, oldest first
    pub fn recent_history(&self, id: &str, max: usize) -> SessionResult<Vec<HistoryEntry>> {
        self.with_session(id, |s| {
            let start = s.history.len().saturating_sub(max);
            s.history[start..].to_vec()
        })
    }

    pub fn increment_questions(&self, id: &str) -> SessionResult<u32> {
        self.with_session(id, |s| {
            s.questions_asked += 1;
            s.questions_asked
        })
    }

    pub fn apply_effects(&self, id: &str, effects: Vec<SessionEffect>) -> SessionResult<()> {
        if effects.is_empty() {
            return Ok(());
        }
        self.with_session(id, |s| {
            for effect in effects {
                match effect {
                    SessionEffect::SetItinerary(itinerary) => s.itinerary = Some(itinerary),
                    SessionEffect::AddCitations(citations) => s.add_citations(citations),
                    SessionEffect::QuestionAsked => s.questions_asked += 1,
                }
            }
        })
    }

    pub fn delete(&self, id: &str) -> SessionResult<()> {
        match self.lock().remove(id) {
            Some(_) => {
                tracing::info!(session_id = %id, "Deleted session");
                Ok(())
            }
            None => Err(SessionError::NotFound(id.to_string())),
        }
    }

    /// Remove every idle session, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_accessed <= self.timeout);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, "Cleaned up expired sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use serde_json::json;

    fn store() -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (SessionStore::new(Duration::minutes(30), clock.clone()), clock)
    }

    fn citation(url: &str) -> Citation {
        Citation {
            source: "Wikivoyage".into(),
            url: url.into(),
            section: "See".into(),
        }
    }

    #[test]
    fn create_get_delete() {
        let (store, _clock) = store();
        let id = store.create();
        let session = store.get(&id).unwrap();
        assert_eq!(session.id, id);
        assert!(session.history.is_empty());
        assert!(session.itinerary.is_none());

        store.delete(&id).unwrap();
        assert_eq!(store.get(&id).unwrap_err(), SessionError::NotFound(id.clone()));
        assert!(store.delete(&id).is_err());
    }

    #[test]
    fn idle_sessions_expire_but_access_keeps_them_alive() {
        let (store, clock) = store();
        let id = store.create();

        clock.advance(Duration::minutes(20));
        assert!(store.exists(&id));
        clock.advance(Duration::minutes(20));
        assert!(store.exists(&id));

        clock.advance(Duration::minutes(31));
        assert!(matches!(store.get(&id), Err(SessionError::NotFound(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn history_window_returns_latest_in_order() {
        let (store, _clock) = store();
        let id = store.create();
        for i in 0..15 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.append_message(&id, role, format!("m{i}")).unwrap();
        }
        let recent = store.recent_history(&id, 10).unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].content, "m5");
        assert_eq!(recent[9].content, "m14");
        assert_eq!(store.recent_history(&id, 100).unwrap().len(), 15);
    }

    #[test]
    fn effects_set_itinerary_and_dedupe_citations() {
        let (store, _clock) = store();
        let id = store.create();
        store
            .apply_effects(
                &id,
                vec![
                    SessionEffect::SetItinerary(json!({"day_1": {}})),
                    SessionEffect::AddCitations(vec![citation("https://a"), citation("https://b")]),
                    SessionEffect::AddCitations(vec![citation("https://a"), citation("https://c")]),
                    SessionEffect::QuestionAsked,
                ],
            )
            .unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.itinerary, Some(json!({"day_1": {}})));
        let urls: Vec<&str> = session.citations.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, ["https://a", "https://b", "https://c"]);
        assert_eq!(session.questions_asked, 1);
    }

    #[test]
    fn patch_merges_preferences_and_replaces_the_rest() {
        let (store, _clock) = store();
        let id = store.create();
        let mut prefs = Map::new();
        prefs.insert("budget".into(), json!("mid-range"));
        store
            .update(
                &id,
                SessionPatch {
                    user_preferences: Some(prefs),
                    itinerary: Some(Some(json!({"day_1": {}}))),
                    citations: Some(vec![citation("https://a")]),
                },
            )
            .unwrap();

        let mut more = Map::new();
        more.insert("pace".into(), json!("relaxed"));
        store
            .update(
                &id,
                SessionPatch {
                    user_preferences: Some(more),
                    itinerary: Some(None),
                    ..SessionPatch::default()
                },
            )
            .unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.user_preferences.len(), 2);
        assert!(session.itinerary.is_none());
        assert_eq!(session.citations.len(), 1);
    }

    #[test]
    fn cleanup_sweeps_only_idle_sessions() {
        let (store, clock) = store();
        let old = store.create();
        clock.advance(Duration::minutes(25));
        let fresh = store.create();
        clock.advance(Duration::minutes(10));

        assert_eq!(store.cleanup_expired(), 1);
        assert!(!store.exists(&old));
        assert!(store.exists(&fresh));
        assert_eq!(store.increment_questions(&fresh).unwrap(), 1);
    }
}
