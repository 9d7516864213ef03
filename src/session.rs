//! Session isolation. Every session owns one [`Registry`] behind an async
//! mutex; a request holds that lock for its whole duration.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::data_registry::Registry;

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub registry: Mutex<Registry>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            registry: Mutex::new(Registry::new()),
        }
    }
}

struct Entry {
    session: Arc<Session>,
    last_activity: DateTime<Utc>,
}

impl Entry {
    fn is_idle(&self, max_idle_seconds: i64) -> bool {
        (Utc::now() - self.last_activity).num_seconds() > max_idle_seconds
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Maximum number of sessions reached")]
    MaxSessionsReached,

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Entry>>>,
    max_sessions: usize,
    idle_timeout_seconds: i64,
}

impl SessionStore {
    pub fn new(max_sessions: usize, idle_timeout_seconds: i64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
            idle_timeout_seconds,
        }
    }

    /// Opens a new session, evicting idle ones first when the store is full.
    pub async fn create(&self) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            sessions.retain(|_, e| !e.is_idle(self.idle_timeout_seconds));
            if sessions.len() >= self.max_sessions {
                return Err(SessionError::MaxSessionsReached);
            }
        }
        let session = Arc::new(Session::new());
        sessions.insert(
            session.id,
            Entry {
                session: session.clone(),
                last_activity: Utc::now(),
            },
        );
        Ok(session)
    }

    /// Looks a session up and records the activity.
    pub async fn get(&self, id: &Uuid) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(entry) => {
                entry.last_activity = Utc::now();
                Ok(entry.session.clone())
            }
            None => Err(SessionError::SessionNotFound(*id)),
        }
    }

    pub async fn remove(&self, id: &Uuid) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id).map(|e| e.session)
    }

    pub async fn cleanup_idle_sessions(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, e| !e.is_idle(self.idle_timeout_seconds));
        before - sessions.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[cfg(test)]
    async fn backdate(&self, id: &Uuid, seconds: i64) {
        if let Some(entry) = self.sessions.write().await.get_mut(id) {
            entry.last_activity = Utc::now() - chrono::Duration::seconds(seconds);
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(100, 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_registry::{SourceInfo, SourceKind};
    use crate::table::Table;

    #[tokio::test]
    async fn test_create_get_remove() {
        let store = SessionStore::new(10, 3600);
        let session = store.create().await.unwrap();
        let again = store.get(&session.id).await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert!(store.remove(&session.id).await.is_some());
        assert_eq!(
            store.get(&session.id).await.unwrap_err(),
            SessionError::SessionNotFound(session.id)
        );
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::default();
        let a = store.create().await.unwrap();
        let b = store.create().await.unwrap();
        a.registry
            .lock()
            .await
            .add_dataset("t", Table::default(), SourceInfo::new(SourceKind::Inline, None));
        assert_eq!(a.registry.lock().await.len(), 1);
        assert!(b.registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_max_sessions_evicts_idle_first() {
        let store = SessionStore::new(2, 60);
        let first = store.create().await.unwrap();
        store.create().await.unwrap();
        assert_eq!(store.create().await.unwrap_err(), SessionError::MaxSessionsReached);

        store.backdate(&first.id, 120).await;
        assert!(store.create().await.is_ok());
        assert_eq!(store.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_cleanup_idle_sessions() {
        let store = SessionStore::new(10, 60);
        let idle = store.create().await.unwrap();
        store.create().await.unwrap();
        store.backdate(&idle.id, 61).await;
        assert_eq!(store.cleanup_idle_sessions().await, 1);
        assert_eq!(store.session_count().await, 1);
    }
}
