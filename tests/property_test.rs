//! Property tests covering binding uniqueness, principal isolation, token
//! binding, the capability gate, and TTL monotonicity.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use ssap::config::{ProviderConfig, SsapConfig, TemplateConfig};
use ssap::error::SsapError;
use ssap::model::{AcquireMode, Claims, SessionRecord};
use ssap::provider::fake::FakeProviderClient;
use ssap::relay;
use ssap::session::SessionManager;
use ssap::store::{MokaSessionStore, SessionStore};
use ssap::token::TokenService;
use ssap::AppState;

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}"
}

fn test_config() -> Arc<SsapConfig> {
    Arc::new(SsapConfig {
        enabled: true,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        log: "warn".into(),
        jwt_secret: "prop-secret".into(),
        jwt_issuer: "ssap".into(),
        token_ttl_minutes: 60,
        session_max_hours: 8,
        provider_tag: "test-provider".into(),
        capabilities: BTreeSet::from(["execute".to_string()]),
        capabilities_ordered: vec!["execute".into()],
        provider: ProviderConfig {
            api_key: "k".into(),
            endpoint: String::new(),
            control_base: String::new(),
        },
        template: TemplateConfig {
            name: "ssap-default".into(),
            image: "img".into(),
            cpu: None,
            memory: None,
            storage: None,
        },
        auto_create_template: false,
        cache_prefix: "ssap".into(),
    })
}

fn manager() -> SessionManager {
    let store: Arc<dyn SessionStore> = Arc::new(MokaSessionStore::new());
    let provider: Arc<dyn ssap::provider::ProviderClient> =
        Arc::new(FakeProviderClient::new(vec!["ssap-default".into()]));
    SessionManager::new(store, provider, test_config())
}

fn sample_record() -> SessionRecord {
    let now = Utc::now();
    SessionRecord {
        session_id: "ssn_feedfacecafe".into(),
        thread_id: "t-1".into(),
        principal_id: "alice".into(),
        sandbox_name: "sbx-1".into(),
        provider: "test".into(),
        dataplane_url: "http://127.0.0.1:1".into(),
        created_at: now,
        session_expires_at: now + ChronoDuration::hours(8),
    }
}

fn claims_with_caps(caps: Vec<String>) -> Claims {
    Claims {
        iss: "ssap".into(),
        sub: "alice".into(),
        sid: "ssn_feedfacecafe".into(),
        thread_id: "t-1".into(),
        sandbox_id: "sbx-1".into(),
        caps,
        iat: Utc::now().timestamp(),
        exp: (Utc::now() + ChronoDuration::hours(1)).timestamp(),
        jti: "jti-1".into(),
    }
}

proptest! {
    /// Two sequential `ensure` calls for the same (principal, thread) return
    /// the same session_id.
    #[test]
    fn binding_uniqueness(principal in ident(), thread in ident()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mgr = manager();
            let first = mgr.ensure(&principal, &thread, AcquireMode::Ensure, None).await.unwrap();
            let second = mgr.ensure(&principal, &thread, AcquireMode::Ensure, None).await.unwrap();
            prop_assert_eq!(first.session_id, second.session_id);
            Ok(())
        }).unwrap();
    }

    /// `get_owned` with a principal different from the record's owner
    /// always yields FORBIDDEN.
    #[test]
    fn principal_isolation(owner in ident(), intruder in ident(), thread in ident()) {
        prop_assume!(owner != intruder);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mgr = manager();
            let record = mgr.ensure(&owner, &thread, AcquireMode::Ensure, None).await.unwrap();
            let result = mgr.get_owned(&intruder, &record.session_id).await;
            prop_assert!(matches!(result, Err(SsapError::Forbidden(_))));
            Ok(())
        }).unwrap();
    }

    /// A relay endpoint requiring capability C rejects any token whose
    /// `caps` omits C, regardless of what other capabilities it does carry.
    #[test]
    fn capability_gate(present in proptest::collection::vec(ident(), 0..4), required in ident()) {
        prop_assume!(!present.contains(&required));
        let claims = claims_with_caps(present);
        let result = TokenService::require_capability(&claims, &required);
        prop_assert!(matches!(result, Err(SsapError::CapabilityDenied(_))));
    }

    /// Converse: a token that does carry the required capability is let
    /// through regardless of what else is in its `caps` list.
    #[test]
    fn capability_gate_allows_present_capability(mut present in proptest::collection::vec(ident(), 0..4), required in ident()) {
        if !present.contains(&required) {
            present.push(required.clone());
        }
        let claims = claims_with_caps(present);
        prop_assert!(TokenService::require_capability(&claims, &required).is_ok());
    }

    /// TTL monotonicity — a session is expired iff `now` is past
    /// `session_expires_at`, for any offset.
    #[test]
    fn ttl_monotonicity(offset_secs in -100_000i64..100_000i64) {
        let record = sample_record();
        let now = record.session_expires_at + ChronoDuration::seconds(offset_secs);
        let expired = record.is_expired(now);
        prop_assert_eq!(expired, offset_secs > 0);
    }
}

#[tokio::test]
async fn token_binding_rejects_a_session_id_mismatch() {
    let provider: Arc<dyn ssap::provider::ProviderClient> =
        Arc::new(FakeProviderClient::new(vec!["ssap-default".into()]));
    let state = AppState::new(test_config(), provider);

    let record = state
        .sessions
        .ensure("alice", "t-1", AcquireMode::Ensure, None)
        .await
        .unwrap();
    let (token, _) = state.tokens.issue(&record).unwrap();

    // The token is bound to `record.session_id`; presenting it against a
    // different session_id in the path must fail even though the token
    // itself is otherwise valid and carries the right capability.
    let result = relay::authorize(&state, "some-other-session", &token, "execute").await;
    assert!(matches!(result, Err(SsapError::Forbidden(_))));
}
