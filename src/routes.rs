//! Session endpoints: acquire/get/refresh/release, plus the ambient
//! `/healthz` liveness probe.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{SsapError, SsapResult};
use crate::model::AcquireMode;
use crate::principal::Principal;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AcquireRequest {
    pub thread_id: String,
    pub mode: AcquireMode,
    pub sandbox_hint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SandboxView {
    pub id: String,
    pub provider: String,
    pub http_base_url: String,
    pub ws_base_url: String,
}

#[derive(Debug, Serialize)]
pub struct AcquireResponse {
    pub session_id: String,
    pub thread_id: String,
    pub sandbox: SandboxView,
    pub token: String,
    pub expires_at: String,
}

fn request_scheme(headers: &HeaderMap) -> &'static str {
    let forwarded_https = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("https"))
        .unwrap_or(false);
    if forwarded_https {
        "https"
    } else {
        "http"
    }
}

fn request_host(headers: &HeaderMap) -> &str {
    headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
}

fn sandbox_view(headers: &HeaderMap, record: &crate::model::SessionRecord) -> SandboxView {
    let scheme = request_scheme(headers);
    let ws_scheme = if scheme == "https" { "wss" } else { "ws" };
    let host = request_host(headers);
    let http_base_url = format!("{scheme}://{host}/v1/sandbox/relay/{}", record.session_id);
    let ws_base_url = format!("{ws_scheme}://{host}/v1/sandbox/relay/{}", record.session_id);
    SandboxView {
        id: record.sandbox_name.clone(),
        provider: record.provider.clone(),
        http_base_url,
        ws_base_url,
    }
}

fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    headers: HeaderMap,
    Json(body): Json<AcquireRequest>,
) -> SsapResult<Json<AcquireResponse>> {
    state.config.require_enabled()?;
    if body.thread_id.trim().is_empty() {
        return Err(SsapError::InvalidRequest("thread_id must not be empty".into()));
    }

    let record = state
        .sessions
        .ensure(principal.as_str(), &body.thread_id, body.mode, body.sandbox_hint.as_deref())
        .await?;
    let (token, expires_at) = state.tokens.issue(&record)?;

    Ok(Json(AcquireResponse {
        session_id: record.session_id.clone(),
        thread_id: record.thread_id.clone(),
        sandbox: sandbox_view(&headers, &record),
        token,
        expires_at: format_timestamp(expires_at),
    }))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> SsapResult<Json<AcquireResponse>> {
    state.config.require_enabled()?;
    let record = state.sessions.get_owned(principal.as_str(), &session_id).await?;
    let (token, expires_at) = state.tokens.issue(&record)?;

    Ok(Json(AcquireResponse {
        session_id: record.session_id.clone(),
        thread_id: record.thread_id.clone(),
        sandbox: sandbox_view(&headers, &record),
        token,
        expires_at: format_timestamp(expires_at),
    }))
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub token: String,
    pub expires_at: String,
}

pub async fn refresh_session(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> SsapResult<Json<RefreshResponse>> {
    state.config.require_enabled()?;
    let record = state.sessions.refresh(principal.as_str(), &session_id).await?;
    let (token, expires_at) = state.tokens.issue(&record)?;
    Ok(Json(RefreshResponse {
        token,
        expires_at: format_timestamp(expires_at),
    }))
}

pub async fn release_session(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> SsapResult<StatusCode> {
    state.config.require_enabled()?;
    state.sessions.release(principal.as_str(), &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
