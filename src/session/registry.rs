//! Registry owning every live session.

use super::types::{Session, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Error type for session lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session closed: {0}")]
    Closed(String),
}

#[derive(Default)]
struct RegistryState {
    live: HashMap<SessionId, Arc<Session>>,
    /// Ids that were removed; never handed out again.
    retired: HashSet<SessionId>,
}

/// Thread-safe map from session id to session.
///
/// The registry is the only long-lived owner of a [`Session`]. Request
/// handlers get an `Arc` for the duration of one request.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a new session and return its id.
    pub fn create(&self) -> SessionId {
        let mut state = self.lock();
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !state.live.contains_key(&candidate) && !state.retired.contains(&candidate) {
                break candidate;
            }
        };
        state
            .live
            .insert(id.clone(), Arc::new(Session::new(id.clone())));
        info!(session_id = %id, live = state.live.len(), "Session created");
        id
    }

    /// Look up a live session.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.lock()
            .live
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().live.contains_key(id)
    }

    /// Remove a session and close its binding.
    ///
    /// Idempotent: returns `None` when there was nothing to remove. Once this
    /// returns, [`get`](Self::get) never resolves the id again.
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = {
            let mut state = self.lock();
            let removed = state.live.remove(id);
            if removed.is_some() {
                state.retired.insert(id.to_string());
            }
            removed
        };

        match &removed {
            Some(session) => {
                session.close().await;
                info!(session_id = %id, "Session removed");
            }
            None => debug!(session_id = %id, "Remove requested for unknown session"),
        }
        removed
    }

    /// Remove and close every live session. Returns how many were closed.
    pub async fn drain(&self) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let mut state = self.lock();
            let drained: Vec<_> = state.live.drain().collect();
            for (id, _) in &drained {
                state.retired.insert(id.clone());
            }
            drained.into_iter().map(|(_, s)| s).collect()
        };

        for session in &sessions {
            session.close().await;
            info!(session_id = %session.id(), "Transport closed for session");
        }
        sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().live.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.lock().live.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn concurrent_creates_are_distinct() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || (0..64).map(|_| registry.create()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("creator thread") {
                assert!(ids.insert(id), "duplicate session id");
            }
        }
        assert_eq!(ids.len(), 16 * 64);
        assert_eq!(registry.len(), 16 * 64);
    }

    #[tokio::test]
    async fn removed_session_never_resolves() {
        let registry = SessionRegistry::new();
        let id = registry.create();
        let session = registry.get(&id).expect("live session");
        assert_eq!(session.id(), id);

        let removed = registry.remove(&id).await.expect("was live");
        assert!(removed.is_closed());
        assert_eq!(registry.get(&id).unwrap_err(), SessionError::NotFound(id.clone()));
        assert!(!registry.contains(&id));

        // Idempotent.
        assert!(registry.remove(&id).await.is_none());
        assert!(registry.remove("never-issued").await.is_none());
    }

    #[tokio::test]
    async fn remove_racing_get_is_all_or_nothing() {
        let registry = Arc::new(SessionRegistry::new());
        for _ in 0..32 {
            let id = registry.create();
            let getter = {
                let registry = registry.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    match registry.get(&id) {
                        Ok(session) => session.acquire().await.is_ok() || session.is_closed(),
                        Err(SessionError::NotFound(_)) => true,
                        Err(SessionError::Closed(_)) => false,
                    }
                })
            };
            registry.remove(&id).await;
            assert!(getter.await.expect("getter task"));
            assert!(registry.get(&id).is_err());
        }
    }

    #[tokio::test]
    async fn drain_closes_everything() {
        let registry = SessionRegistry::new();
        let a = registry.create();
        let b = registry.create();
        let held = registry.get(&a).expect("live");

        assert_eq!(registry.drain().await, 2);
        assert!(registry.is_empty());
        assert!(held.is_closed());
        assert!(registry.get(&b).is_err());
        assert_eq!(registry.drain().await, 0);
    }
}
