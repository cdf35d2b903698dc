//! Registry of live sessions keyed by authority

use dashmap::DashMap;
use std::sync::Arc;

use super::{Session, SessionSummary};

/// Live sessions, keyed by the authority string they were resolved from
///
/// Insert, remove and dispose-all are idempotent; anything removed is
/// disposed.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session, disposing any session it replaces
    pub fn insert(&self, session: Arc<Session>) {
        let authority = session.authority().to_string();
        if let Some(previous) = self.sessions.insert(authority, session) {
            previous.dispose();
        }
    }

    /// Remove and dispose the session for `authority`
    pub fn remove(&self, authority: &str) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(authority)?;
        session.dispose();
        Some(session)
    }

    /// Get a session by authority
    pub fn get(&self, authority: &str) -> Option<Arc<Session>> {
        self.sessions.get(authority).map(|r| Arc::clone(&r))
    }

    /// Whether `session` is the one registered for its authority
    pub fn is_registered(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .get(session.authority())
            .map(|r| Arc::ptr_eq(&r, session))
            .unwrap_or(false)
    }

    /// List all sessions
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Summaries of all sessions, sorted by authority
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self.list().iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.authority.cmp(&b.authority));
        summaries
    }

    /// Remove and dispose every session
    pub fn dispose_all(&self) -> usize {
        let authorities: Vec<String> = self.sessions.iter().map(|r| r.key().clone()).collect();
        authorities
            .iter()
            .filter(|authority| self.remove(authority).is_some())
            .count()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
