//! Session manager: the keyed-singleton policy over the session store and
//! the provider client. `ensure` is the only operation that can create
//! state; everything else reads and validates.

use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::config::SsapConfig;
use crate::error::SsapError;
use crate::model::{AcquireMode, SessionRecord};
use crate::provider::ProviderClient;
use crate::store::{binding_key, SessionStore};

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn ProviderClient>,
    config: Arc<SsapConfig>,
    /// Guards the lookup-or-create decision in `ensure` only — never held
    /// across a provider call or a store write.
    lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn ProviderClient>,
        config: Arc<SsapConfig>,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            lock: Mutex::new(()),
        }
    }

    fn new_session_id() -> String {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("ssn_{}", hex::encode(bytes))
    }

    #[instrument(skip(self), fields(principal, thread_id))]
    pub async fn ensure(
        &self,
        principal: &str,
        thread_id: &str,
        mode: AcquireMode,
        sandbox_hint: Option<&str>,
    ) -> Result<SessionRecord, SsapError> {
        let key = binding_key(principal, thread_id);
        let now = Utc::now();

        {
            let _guard = self.lock.lock().await;
            if let Some(session_id) = self.store.load_binding(&key).await {
                if let Some(record) = self.store.load_session(&session_id).await {
                    if !record.is_expired(now) {
                        return Ok(record);
                    }
                }
            } else if mode == AcquireMode::Get {
                return Err(SsapError::SessionNotFound(format!(
                    "no session bound to thread '{thread_id}'"
                )));
            }
        }

        if mode == AcquireMode::Get {
            return Err(SsapError::SessionNotFound(format!(
                "no session bound to thread '{thread_id}'"
            )));
        }

        let descriptor = match sandbox_hint {
            Some(hint) => self.provider.get_sandbox(hint).await?,
            None => {
                self.provider
                    .create_sandbox(&self.config.template.name, None)
                    .await?
            }
        };

        let now = Utc::now();
        let session_expires_at = now + chrono::Duration::hours(self.config.session_max_hours as i64);
        let record = SessionRecord {
            session_id: Self::new_session_id(),
            thread_id: thread_id.to_string(),
            principal_id: principal.to_string(),
            sandbox_name: descriptor.name,
            provider: self.config.provider_tag.clone(),
            dataplane_url: descriptor.dataplane_url,
            created_at: now,
            session_expires_at,
        };

        {
            let _guard = self.lock.lock().await;
            let ttl = record.remaining_ttl(Utc::now());
            self.store.save_session(record.clone(), ttl).await;
            self.store
                .save_binding(key, record.session_id.clone(), ttl)
                .await;
        }

        info!(session_id = %record.session_id, "session created");
        Ok(record)
    }

    pub async fn get_owned(
        &self,
        principal: &str,
        session_id: &str,
    ) -> Result<SessionRecord, SsapError> {
        let record = self
            .store
            .load_session(session_id)
            .await
            .ok_or_else(|| SsapError::SessionNotFound(format!("no such session '{session_id}'")))?;

        if record.principal_id != principal {
            return Err(SsapError::Forbidden("session belongs to a different principal".into()));
        }
        if record.is_expired(Utc::now()) {
            return Err(SsapError::SessionExpired);
        }
        Ok(record)
    }

    pub async fn refresh(
        &self,
        principal: &str,
        session_id: &str,
    ) -> Result<SessionRecord, SsapError> {
        let record = self.get_owned(principal, session_id).await?;
        let ttl = record.remaining_ttl(Utc::now());
        let key = binding_key(&record.principal_id, &record.thread_id);
        self.store.save_session(record.clone(), ttl).await;
        self.store.save_binding(key, record.session_id.clone(), ttl).await;
        Ok(record)
    }

    pub async fn release(&self, principal: &str, session_id: &str) -> Result<(), SsapError> {
        let record = self.get_owned(principal, session_id).await?;
        self.store.clear(&record).await;
        info!(session_id = %record.session_id, "session released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fake::FakeProviderClient;
    use crate::store::MokaSessionStore;
    use std::collections::BTreeSet;
    use std::net::SocketAddr;

    fn test_config() -> Arc<SsapConfig> {
        Arc::new(SsapConfig {
            enabled: true,
            bind_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            log: "info".into(),
            jwt_secret: "test-secret".into(),
            jwt_issuer: "ssap".into(),
            token_ttl_minutes: 60,
            session_max_hours: 8,
            provider_tag: "test-provider".into(),
            capabilities: BTreeSet::from(["execute".to_string(), "upload".to_string(), "download".to_string()]),
            capabilities_ordered: vec!["execute".into(), "upload".into(), "download".into()],
            provider: crate::config::ProviderConfig {
                api_key: "sekret".into(),
                endpoint: "http://127.0.0.1:1".into(),
                control_base: "http://127.0.0.1:1".into(),
            },
            template: crate::config::TemplateConfig {
                name: "ssap-default".into(),
                image: "img".into(),
                cpu: None,
                memory: None,
                storage: None,
            },
            auto_create_template: true,
            cache_prefix: "ssap".into(),
        })
    }

    fn manager() -> SessionManager {
        let store: Arc<dyn SessionStore> = Arc::new(MokaSessionStore::new());
        let provider: Arc<dyn ProviderClient> = Arc::new(FakeProviderClient::new(vec!["ssap-default".into()]));
        SessionManager::new(store, provider, test_config())
    }

    #[tokio::test]
    async fn ensure_is_idempotent_for_the_same_binding() {
        let mgr = manager();
        let first = mgr.ensure("alice", "t-1", AcquireMode::Ensure, None).await.unwrap();
        let second = mgr.ensure("alice", "t-1", AcquireMode::Ensure, None).await.unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn get_mode_without_prior_binding_is_session_not_found() {
        let mgr = manager();
        let result = mgr.ensure("bob", "t-9", AcquireMode::Get, None).await;
        assert!(matches!(result, Err(SsapError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn cross_principal_get_owned_is_forbidden() {
        let mgr = manager();
        let record = mgr.ensure("alice", "t-1", AcquireMode::Ensure, None).await.unwrap();
        let result = mgr.get_owned("mallory", &record.session_id).await;
        assert!(matches!(result, Err(SsapError::Forbidden(_))));
    }

    #[tokio::test]
    async fn release_then_get_owned_is_session_not_found() {
        let mgr = manager();
        let record = mgr.ensure("alice", "t-1", AcquireMode::Ensure, None).await.unwrap();
        mgr.release("alice", &record.session_id).await.unwrap();
        let result = mgr.get_owned("alice", &record.session_id).await;
        assert!(matches!(result, Err(SsapError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn refresh_preserves_absolute_expiry() {
        let mgr = manager();
        let record = mgr.ensure("alice", "t-1", AcquireMode::Ensure, None).await.unwrap();
        let refreshed = mgr.refresh("alice", &record.session_id).await.unwrap();
        assert_eq!(record.session_expires_at, refreshed.session_expires_at);
    }
}
