//! Bounded pool of [`Session`]s with rotation and persistence, per
//! `spec.md` §4.C.
//!
//! Grounded in `original_source/sessions/_session_pool.py`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::seq::IteratorRandom;

use crate::error::LifecycleError;
use crate::session::Session;
use crate::storage::KeyValueStoreClient;

#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    pub max_pool_size: u32,
    /// Key under which pool state is persisted, overridable per
    /// `spec.md` §6's `CRAWLEE_SESSION_POOL_STATE` default.
    pub persistence_key: String,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 1000,
            persistence_key: "CRAWLEE_SESSION_POOL_STATE".to_string(),
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct PersistedState {
    max_pool_size: u32,
    sessions: Vec<Session>,
}

pub struct SessionPool {
    config: SessionPoolConfig,
    sessions: DashMap<String, Session>,
    store: Option<Arc<dyn KeyValueStoreClient>>,
    started: AtomicBool,
}

pub struct StartedGuard {
    stopped: bool,
}

impl Drop for StartedGuard {
    fn drop(&mut self) {
        if !self.stopped {
            log::warn!("SessionPool::StartedGuard dropped without calling stop()");
        }
    }
}

impl SessionPool {
    pub fn new(config: SessionPoolConfig, store: Option<Arc<dyn KeyValueStoreClient>>) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            store,
            started: AtomicBool::new(false),
        }
    }

    /// Restores persisted state if available and non-empty; otherwise
    /// pre-creates sessions up to `max_pool_size`.
    pub async fn start(&self) -> Result<StartedGuard, LifecycleError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(LifecycleError::AlreadyStarted);
        }

        let restored = if let Some(store) = &self.store {
            match store.get_value(&self.config.persistence_key).await {
                Ok(Some(bytes)) => serde_json::from_slice::<PersistedState>(&bytes).ok(),
                _ => None,
            }
        } else {
            None
        };

        match restored {
            Some(state) if !state.sessions.is_empty() => {
                for session in state.sessions {
                    self.sessions.insert(session.id.clone(), session);
                }
            }
            _ => self.fill_sessions_to_max(),
        }

        Ok(StartedGuard { stopped: false })
    }

    pub fn stop(&self, mut guard: StartedGuard) -> Result<(), LifecycleError> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Err(LifecycleError::NotStarted);
        }
        guard.stopped = true;
        Ok(())
    }

    fn fill_sessions_to_max(&self) {
        let missing = self.config.max_pool_size as usize - self.sessions.len().min(self.config.max_pool_size as usize);
        for _ in 0..missing {
            let session = Session::new();
            self.sessions.insert(session.id.clone(), session);
        }
    }

    /// Returns a usable session. A uniformly random pick that turns out
    /// unusable triggers a drop of retired sessions and creation of a
    /// fresh one, per `_session_pool.py`.
    pub fn get_session(&self) -> Session {
        self.fill_sessions_to_max();

        let picked = self
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .choose(&mut rand::rng());

        match picked {
            Some(session) if session.is_usable() => session,
            _ => {
                self.remove_retired_sessions();
                let fresh = Session::new();
                self.sessions.insert(fresh.id.clone(), fresh.clone());
                fresh
            }
        }
    }

    /// Returns the session with the given id only if present and usable.
    pub fn get_session_by_id(&self, id: &str) -> Option<Session> {
        self.fill_sessions_to_max();
        self.sessions.get(id).and_then(|entry| {
            if entry.value().is_usable() {
                Some(entry.value().clone())
            } else {
                log::warn!("session {id} is no longer usable");
                None
            }
        })
    }

    /// Replaces a session in the pool with an updated copy (e.g. after
    /// `mark_good`/`mark_bad`/`retire` mutated a local copy returned by
    /// `get_session`).
    pub fn put_session(&self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    /// Duplicate ids are logged and ignored rather than overwriting the
    /// existing session.
    pub fn add_session(&self, session: Session) {
        if self.sessions.contains_key(&session.id) {
            log::warn!("session {} already exists in the pool, ignoring", session.id);
            return;
        }
        self.sessions.insert(session.id.clone(), session);
    }

    fn remove_retired_sessions(&self) {
        self.sessions.retain(|_, session| session.is_usable());
    }

    pub fn usable_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.value().is_usable()).count()
    }

    pub fn total_count(&self) -> usize {
        self.sessions.len()
    }

    pub async fn persist(&self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let state = PersistedState {
            max_pool_size: self.config.max_pool_size,
            sessions: self.sessions.iter().map(|e| e.value().clone()).collect(),
        };
        let bytes = serde_json::to_vec(&state)?;
        store.set_value(&self.config.persistence_key, bytes).await?;
        Ok(())
    }

    pub async fn reset_store(&self) -> anyhow::Result<()> {
        if let Some(store) = &self.store {
            store.delete_value(&self.config.persistence_key).await?;
        }
        self.sessions.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_sessions_to_max_pre_creates_the_configured_count() {
        let pool = SessionPool::new(
            SessionPoolConfig {
                max_pool_size: 3,
                ..Default::default()
            },
            None,
        );
        pool.fill_sessions_to_max();
        assert_eq!(pool.total_count(), 3);
    }

    #[test]
    fn get_session_returns_a_usable_session() {
        let pool = SessionPool::new(
            SessionPoolConfig {
                max_pool_size: 2,
                ..Default::default()
            },
            None,
        );
        let session = pool.get_session();
        assert!(session.is_usable());
    }

    #[test]
    fn add_session_ignores_duplicate_ids() {
        let pool = SessionPool::new(SessionPoolConfig::default(), None);
        let session = Session::new();
        pool.add_session(session.clone());
        let mut other = Session::new();
        other.id = session.id.clone();
        other.error_score = 99.0;
        pool.add_session(other);
        let stored = pool.get_session_by_id(&session.id).expect("session must still be present");
        assert_eq!(stored.error_score, 0.0, "duplicate add must be ignored, not overwrite");
    }

    #[tokio::test]
    async fn start_twice_is_a_lifecycle_error() {
        let pool = SessionPool::new(SessionPoolConfig::default(), None);
        let guard = pool.start().await.expect("first start must succeed");
        let err = pool.start().await.expect_err("second start must fail");
        assert!(matches!(err, LifecycleError::AlreadyStarted));
        pool.stop(guard).expect("stop must succeed");
    }
}
