//! Session-scoped client state.
//!
//! Tracks the logical browse session presented to the target: its id, its
//! request counter, and any sticky headers or cookies accumulated along the
//! way. Recovery clears all of it in one step.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub request_count: u32,
    pub sticky_headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
}

#[derive(Debug)]
struct SessionState {
    id: String,
    created_at: DateTime<Utc>,
    request_count: u32,
    sticky_headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl SessionState {
    fn fresh() -> Self {
        let now = Utc::now();
        Self {
            id: format!("sess-{}", now.timestamp_millis()),
            created_at: now,
            request_count: 0,
            sticky_headers: HashMap::new(),
            cookies: HashMap::new(),
        }
    }
}

/// Thread-safe, cloneable session handle.
#[derive(Clone, Debug)]
pub struct SessionStore {
    inner: Arc<Mutex<SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState::fresh())),
        }
    }

    /// Bump the request counter and return (session id, sequence number).
    pub fn touch(&self) -> (String, u32) {
        let mut guard = self.inner.lock().expect("session lock poisoned");
        guard.request_count = guard.request_count.saturating_add(1);
        (guard.id.clone(), guard.request_count)
    }

    pub fn set_sticky_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut guard = self.inner.lock().expect("session lock poisoned");
        guard.sticky_headers.insert(name.into(), value.into());
    }

    pub fn set_cookie(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut guard = self.inner.lock().expect("session lock poisoned");
        guard.cookies.insert(name.into(), value.into());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let guard = self.inner.lock().expect("session lock poisoned");
        SessionSnapshot {
            id: guard.id.clone(),
            created_at: guard.created_at,
            request_count: guard.request_count,
            sticky_headers: guard.sticky_headers.clone(),
            cookies: guard.cookies.clone(),
        }
    }

    /// Discard all session state and start a new session id.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().expect("session lock poisoned");
        *guard = SessionState::fresh();
        log::debug!("session state cleared, new session {}", guard.id);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_increments_sequence() {
        let store = SessionStore::new();
        let (id1, seq1) = store.touch();
        let (id2, seq2) = store.touch();
        assert_eq!(id1, id2);
        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);
    }

    #[test]
    fn clear_resets_counter_and_state() {
        let store = SessionStore::new();
        store.touch();
        store.set_cookie("cf_clearance", "abc");
        store.clear();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.request_count, 0);
        assert!(snapshot.cookies.is_empty());
    }
}
