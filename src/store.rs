//! Session store: two independently-TTL'd keyed maps,
//! `session:{id} -> SessionRecord` and `binding:{sha256(principal:thread)}
//! -> session_id`. Expressed as a trait so a shared-KV implementation can
//! stand in for the in-process one without the session manager caring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use sha2::{Digest, Sha256};

use crate::model::SessionRecord;

/// `sha256(principal:thread)[..]`, hex-encoded — the binding map's key.
pub fn binding_key(principal_id: &str, thread_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(principal_id.as_bytes());
    hasher.update(b":");
    hasher.update(thread_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, record: SessionRecord, ttl: Duration);
    async fn load_session(&self, session_id: &str) -> Option<SessionRecord>;
    async fn save_binding(&self, key: String, session_id: String, ttl: Duration);
    async fn load_binding(&self, key: &str) -> Option<String>;

    /// Remove both the session entry and its binding. A binding whose
    /// `thread_id` no longer matches (e.g. overwritten by a newer `ensure`)
    /// is left alone — that entry belongs to a different live session now.
    async fn clear(&self, record: &SessionRecord);
}

/// A single TTL attached to each cache value — moka applies one static TTL
/// per cache by default; sessions need a per-write TTL computed from the
/// record's remaining lifetime, so a custom `Expiry` reads it back out of
/// the stored tuple.
struct PerEntryTtl;

impl<K, V> Expiry<K, (V, Duration)> for PerEntryTtl {
    fn expire_after_create(&self, _key: &K, value: &(V, Duration), _created_at: Instant) -> Option<Duration> {
        Some(value.1)
    }
}

pub struct MokaSessionStore {
    sessions: Cache<String, (SessionRecord, Duration)>,
    bindings: Cache<String, (String, Duration)>,
}

impl MokaSessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(100_000)
                .expire_after(PerEntryTtl)
                .build(),
            bindings: Cache::builder()
                .max_capacity(100_000)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MokaSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MokaSessionStore {
    async fn save_session(&self, record: SessionRecord, ttl: Duration) {
        self.sessions
            .insert(record.session_id.clone(), (record, ttl))
            .await;
    }

    async fn load_session(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.get(session_id).await.map(|(record, _)| record)
    }

    async fn save_binding(&self, key: String, session_id: String, ttl: Duration) {
        self.bindings.insert(key, (session_id, ttl)).await;
    }

    async fn load_binding(&self, key: &str) -> Option<String> {
        self.bindings.get(key).await.map(|(session_id, _)| session_id)
    }

    async fn clear(&self, record: &SessionRecord) {
        self.sessions.invalidate(&record.session_id).await;
        let key = binding_key(&record.principal_id, &record.thread_id);
        if let Some((session_id, _)) = self.bindings.get(&key).await {
            if session_id == record.session_id {
                self.bindings.invalidate(&key).await;
            }
        }
    }
}

pub type SharedSessionStore = Arc<dyn SessionStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_record(session_id: &str, principal: &str, thread: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: session_id.to_string(),
            thread_id: thread.to_string(),
            principal_id: principal.to_string(),
            sandbox_name: "sbx-1".to_string(),
            provider: "test".to_string(),
            dataplane_url: "http://127.0.0.1:1".to_string(),
            created_at: now,
            session_expires_at: now + chrono::Duration::hours(8),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MokaSessionStore::new();
        let record = sample_record("ssn_1", "alice", "t-1");
        store.save_session(record.clone(), Duration::from_secs(60)).await;
        let loaded = store.load_session("ssn_1").await.unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn clear_removes_both_entries() {
        let store = MokaSessionStore::new();
        let record = sample_record("ssn_1", "alice", "t-1");
        let key = binding_key("alice", "t-1");
        store.save_session(record.clone(), Duration::from_secs(60)).await;
        store
            .save_binding(key.clone(), record.session_id.clone(), Duration::from_secs(60))
            .await;

        store.clear(&record).await;

        assert!(store.load_session("ssn_1").await.is_none());
        assert!(store.load_binding(&key).await.is_none());
    }

    #[tokio::test]
    async fn clear_does_not_remove_a_binding_that_was_overwritten() {
        let store = MokaSessionStore::new();
        let old = sample_record("ssn_old", "alice", "t-1");
        let new = sample_record("ssn_new", "alice", "t-1");
        let key = binding_key("alice", "t-1");

        store.save_binding(key.clone(), new.session_id.clone(), Duration::from_secs(60)).await;
        store.clear(&old).await;

        assert_eq!(store.load_binding(&key).await.as_deref(), Some("ssn_new"));
    }
}
