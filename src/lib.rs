pub mod config;
pub mod error;
pub mod model;
pub mod principal;
pub mod provider;
pub mod relay;
pub mod routes;
pub mod session;
pub mod store;
pub mod token;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use config::SsapConfig;
use provider::ProviderClient;
use session::SessionManager;
use store::{MokaSessionStore, SessionStore};
use token::TokenService;

/// Shared application state handed to every route handler.
pub struct AppState {
    pub config: Arc<SsapConfig>,
    pub provider: Arc<dyn ProviderClient>,
    pub sessions: Arc<SessionManager>,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub fn new(config: Arc<SsapConfig>, provider: Arc<dyn ProviderClient>) -> Self {
        let store: Arc<dyn SessionStore> = Arc::new(MokaSessionStore::new());
        let sessions = Arc::new(SessionManager::new(store, provider.clone(), config.clone()));
        let tokens = Arc::new(TokenService::new(
            &config.jwt_secret,
            &config.jwt_issuer,
            config.token_ttl_minutes,
            config.capabilities_ordered.clone(),
        ));
        Self {
            config,
            provider,
            sessions,
            tokens,
        }
    }
}

/// Build the axum router: session endpoints, the HTTP/WS relay, and the
/// ambient `/healthz` probe, wrapped in a per-request tracing span and CORS.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(routes::healthz))
        .route(
            "/v1/sandbox/sessions",
            post(routes::create_session),
        )
        .route(
            "/v1/sandbox/sessions/{session_id}",
            get(routes::get_session).delete(routes::release_session),
        )
        .route(
            "/v1/sandbox/sessions/{session_id}/refresh",
            post(routes::refresh_session),
        )
        .route(
            "/v1/sandbox/relay/{session_id}/execute",
            post(relay::http::execute),
        )
        .route(
            "/v1/sandbox/relay/{session_id}/upload",
            post(relay::http::upload),
        )
        .route(
            "/v1/sandbox/relay/{session_id}/download",
            get(relay::http::download),
        )
        .route(
            "/v1/sandbox/relay/{session_id}/execute/ws",
            get(relay::ws::execute_ws),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the provider-template startup hook; fatal to service start on failure.
/// A no-op when the instance is disabled or auto-create isn't requested.
pub async fn run_startup_checks(config: &SsapConfig, provider: &dyn ProviderClient) -> anyhow::Result<()> {
    if !config.enabled || !config.auto_create_template {
        return Ok(());
    }
    provider::run_startup_hook(provider, &config.template).await?;
    info!(template = %config.template.name, "provider template ready");
    Ok(())
}
