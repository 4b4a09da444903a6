//! Relay engine: the authenticated reverse proxy and the WebSocket tunnel.
//! Both share the same auth-then-load step, so it lives here once.

pub mod http;
pub mod ws;

use axum::http::HeaderMap;

use crate::error::SsapError;
use crate::model::{Claims, SessionRecord};
use crate::AppState;

/// `Authorization: Bearer <token>` or `X-Api-Key: <token>`, bearer preferred.
pub fn extract_client_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Verify the token, require `cap`, load the session, and enforce the
/// `sid`/`sub` binding checks.
pub async fn authorize(
    state: &AppState,
    session_id: &str,
    token: &str,
    cap: &str,
) -> Result<(Claims, SessionRecord), SsapError> {
    let claims = state.tokens.verify(token)?;
    crate::token::TokenService::require_capability(&claims, cap)?;

    if claims.sid != session_id {
        return Err(SsapError::Forbidden("token is not bound to this session".into()));
    }

    let record = state
        .sessions
        .get_owned(&claims.sub, session_id)
        .await?;

    if claims.sub != record.principal_id {
        return Err(SsapError::Forbidden("token principal does not own this session".into()));
    }

    Ok((claims, record))
}
