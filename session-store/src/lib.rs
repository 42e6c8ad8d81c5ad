//! Bounded, LRU-evicted, per-session-locked `ClinicalState` storage.
//!
//! A single long-lived owner of many concurrent sessions: a `SessionStore`
//! holds one
//! `tokio::sync::Mutex<ClinicalState>` per session behind a `dashmap`
//! concurrent map — a single owner with per-session internal locks. No
//! caller holds a session reference across turns; every access goes back
//! through the store.

pub mod compaction;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::clinical::ClinicalState;
use common::error::AppError;
use dashmap::DashMap;
use tracing::{info, warn};

/// One session's state plus the bookkeeping the store needs for eviction.
pub struct SessionEntry {
    state: tokio::sync::Mutex<ClinicalState>,
    last_accessed_millis: AtomicI64,
}

impl SessionEntry {
    fn new(state: ClinicalState) -> Self {
        Self {
            state: tokio::sync::Mutex::new(state),
            last_accessed_millis: AtomicI64::new(now_millis()),
        }
    }

    fn touch(&self) {
        self.last_accessed_millis.store(now_millis(), Ordering::Relaxed);
    }

    /// Acquires the session's lock for the duration of a whole debate turn,
    /// not just the final mutation — the orchestrator's retrieval and
    /// specialist calls happen while holding this guard, so a session's
    /// turns are serialized end-to-end. Non-blocking: a concurrent holder
    /// means `SessionBusy`, never a wait.
    pub fn try_lock(&self) -> Result<tokio::sync::MutexGuard<'_, ClinicalState>, AppError> {
        self.touch();
        self.state.try_lock().map_err(|_| AppError::SessionBusy)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Result of `get_or_create`: distinguishes a session that was freshly
/// minted from one that already existed, and flags an explicit session id
/// the caller supplied that isn't known (evicted, or never issued) —
/// callers map that to an "unknown session" response.
pub enum SessionLookup {
    Existing(String, Arc<SessionEntry>),
    Created(String, Arc<SessionEntry>),
    Unknown,
}

pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionEntry>>,
    max_sessions: usize,
    max_serialized_bytes: usize,
}

impl SessionStore {
    pub fn new(max_sessions: usize, max_serialized_bytes: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
            max_serialized_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn max_serialized_bytes(&self) -> usize {
        self.max_serialized_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Always creates a fresh session, independent of any caller-supplied
    /// id. This is what `/differential` uses: it never takes a session id.
    pub fn create(&self) -> (String, Arc<SessionEntry>) {
        let id = uuid::Uuid::new_v4().to_string();
        let entry = Arc::new(SessionEntry::new(ClinicalState::new(id.clone())));
        self.sessions.insert(id.clone(), entry.clone());
        self.evict_if_over_capacity();
        (id, entry)
    }

    /// `/debate-turn`'s contract: create a session if none was supplied,
    /// look one up if it was, and report `Unknown` rather than silently
    /// creating a new id when the caller's id isn't (or no longer is) in
    /// the map.
    pub fn get_or_create(&self, session_id: Option<String>) -> SessionLookup {
        match session_id {
            None => {
                let (id, entry) = self.create();
                SessionLookup::Created(id, entry)
            }
            Some(id) => match self.sessions.get(&id) {
                Some(entry) => {
                    entry.touch();
                    SessionLookup::Existing(id, entry.clone())
                }
                None => SessionLookup::Unknown,
            },
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        let entry = self.sessions.get(session_id)?.clone();
        entry.touch();
        Some(entry)
    }

    /// Runs `mutator` against the session's state under its per-session
    /// lock. Non-blocking: if another turn already holds the lock, returns
    /// `AppError::SessionBusy` immediately rather than queuing, so exactly
    /// one concurrent caller ever receives `SESSION_BUSY`.
    /// Compaction runs after a successful mutation, before the lock is
    /// released, so every caller always sees a within-cap state.
    pub async fn with_session<F, T>(&self, session_id: &str, mutator: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut ClinicalState) -> Result<T, AppError>,
    {
        let entry = self
            .get(session_id)
            .ok_or_else(|| AppError::NotFound("unknown session".to_string()))?;

        let mut guard = entry.state.try_lock().map_err(|_| AppError::SessionBusy)?;
        let result = mutator(&mut guard);
        if result.is_ok() {
            compaction::compact_if_needed(&mut guard, self.max_serialized_bytes);
        }
        entry.touch();
        result
    }

    /// Reads a snapshot of the session's current state without mutating it.
    /// Also non-blocking with respect to a concurrent turn.
    pub async fn snapshot(&self, session_id: &str) -> Result<ClinicalState, AppError> {
        let entry = self
            .get(session_id)
            .ok_or_else(|| AppError::NotFound("unknown session".to_string()))?;
        let guard = entry.state.try_lock().map_err(|_| AppError::SessionBusy)?;
        Ok(guard.clone())
    }

    fn evict_if_over_capacity(&self) {
        if self.sessions.len() <= self.max_sessions {
            return;
        }
        let lru = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().last_accessed_millis.load(Ordering::Relaxed)))
            .min_by_key(|(_, accessed)| *accessed);

        if let Some((id, _)) = lru {
            self.sessions.remove(&id);
            info!(session_id = %id, "evicted least-recently-used session");
        } else {
            warn!("session store over capacity but no candidate found for eviction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_or_create_returns_existing() {
        let store = SessionStore::new(10, 32 * 1024);
        let (id, _) = store.create();
        match store.get_or_create(Some(id.clone())) {
            SessionLookup::Existing(found_id, _) => assert_eq!(found_id, id),
            _ => panic!("expected Existing"),
        }
    }

    #[tokio::test]
    async fn unknown_session_id_is_reported() {
        let store = SessionStore::new(10, 32 * 1024);
        match store.get_or_create(Some("does-not-exist".to_string())) {
            SessionLookup::Unknown => {}
            _ => panic!("expected Unknown"),
        }
    }

    #[tokio::test]
    async fn none_session_id_creates_fresh_session() {
        let store = SessionStore::new(10, 32 * 1024);
        match store.get_or_create(None) {
            SessionLookup::Created(_, _) => {}
            _ => panic!("expected Created"),
        }
    }

    #[tokio::test]
    async fn concurrent_turn_on_same_session_returns_busy() {
        let store = Arc::new(SessionStore::new(10, 32 * 1024));
        let (id, entry) = store.create();
        let _guard = entry.state.lock().await;

        let result = store.with_session(&id, |_state| Ok(())).await;
        assert!(matches!(result, Err(AppError::SessionBusy)));
    }

    #[tokio::test]
    async fn eviction_keeps_session_count_at_cap() {
        let store = SessionStore::new(2, 32 * 1024);
        store.create();
        store.create();
        store.create();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn try_lock_held_for_a_turn_blocks_a_concurrent_turn() {
        let store = SessionStore::new(10, 32 * 1024);
        let (id, entry) = store.create();
        let guard = entry.try_lock().expect("first turn acquires the lock");

        let result = store.with_session(&id, |_state| Ok(())).await;
        assert!(matches!(result, Err(AppError::SessionBusy)));
        drop(guard);

        let result = store.with_session(&id, |_state| Ok(())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn debate_round_increment_persists_across_calls() {
        let store = SessionStore::new(10, 32 * 1024);
        let (id, _) = store.create();
        store
            .with_session(&id, |state| {
                state.debate_round += 1;
                Ok(())
            })
            .await
            .unwrap();
        let snapshot = store.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.debate_round, 1);
    }
}
