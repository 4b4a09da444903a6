//! HTTP relay: three passthrough endpoints, each
//! authenticate-then-forward-then-mirror. No client header, cookie, or query
//! parameter other than `path` ever reaches the upstream.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_stream::StreamExt;
use tracing::warn;

use crate::error::SsapError;
use crate::relay::{authorize, extract_client_token};
use crate::AppState;

const UPSTREAM_TIMEOUT_SECS: u64 = 120;

fn upstream_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
        .build()
        .expect("relay HTTP client must build")
}

fn required_token(headers: &HeaderMap) -> Result<String, SsapError> {
    extract_client_token(headers).ok_or(SsapError::Unauthenticated)
}

fn upstream_error(op: &str, err: reqwest::Error) -> SsapError {
    warn!(op, err = %err, "relay upstream call failed");
    SsapError::BackendUnavailable(format!("{op}: {err}"))
}

async fn mirror_response(resp: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .cloned();

    let bytes = match resp.bytes().await {
        Ok(b) => b,
        Err(e) => return SsapError::BackendUnavailable(format!("reading upstream body: {e}")).into_response(),
    };

    let mut response = (status, bytes).into_response();
    if let Some(ct) = content_type {
        response.headers_mut().insert(reqwest::header::CONTENT_TYPE, ct);
    }
    response
}

pub async fn execute(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, SsapError> {
    state.config.require_enabled()?;
    let token = required_token(&headers)?;
    let (_claims, record) = authorize(&state, &session_id, &token, "execute").await?;

    let resp = upstream_client()
        .post(format!("{}/execute", record.dataplane_url))
        .header("X-Api-Key", &state.config.provider.api_key)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| upstream_error("execute", e))?;

    Ok(mirror_response(resp).await)
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, SsapError> {
    state.config.require_enabled()?;
    let path = query
        .get("path")
        .filter(|p| !p.is_empty())
        .ok_or_else(|| SsapError::InvalidRequest("missing required query parameter 'path'".into()))?;

    let token = required_token(&headers)?;
    let (_claims, record) = authorize(&state, &session_id, &token, "upload").await?;

    let content_type = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let resp = upstream_client()
        .post(format!("{}/upload", record.dataplane_url))
        .query(&[("path", path.as_str())])
        .header("X-Api-Key", &state.config.provider.api_key)
        .header(reqwest::header::CONTENT_TYPE, content_type)
        .body(body)
        .send()
        .await
        .map_err(|e| upstream_error("upload", e))?;

    Ok(mirror_response(resp).await)
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, SsapError> {
    state.config.require_enabled()?;
    let path = query
        .get("path")
        .filter(|p| !p.is_empty())
        .ok_or_else(|| SsapError::InvalidRequest("missing required query parameter 'path'".into()))?;

    let token = required_token(&headers)?;
    let (_claims, record) = authorize(&state, &session_id, &token, "download").await?;

    let resp = upstream_client()
        .get(format!("{}/download", record.dataplane_url))
        .query(&[("path", path.as_str())])
        .header("X-Api-Key", &state.config.provider.api_key)
        .send()
        .await
        .map_err(|e| upstream_error("download", e))?;

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();

    if !resp.status().is_success() {
        return Ok(mirror_response(resp).await);
    }

    let stream = resp.bytes_stream().map(|chunk| {
        chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    });
    let mut response = (status, Body::from_stream(stream)).into_response();
    if let Some(ct) = content_type {
        response.headers_mut().insert(reqwest::header::CONTENT_TYPE, ct);
    }
    Ok(response)
}
