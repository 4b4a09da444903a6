//! The error taxonomy: one variant per wire error code, with a
//! fixed HTTP status and `retryable` flag baked into the mapping rather than
//! threaded through every call site.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SsapError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("missing or malformed access token")]
    Unauthenticated,

    #[error("token expired")]
    TokenExpired,

    #[error("missing capability: {0}")]
    CapabilityDenied(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("SSAP routes are disabled")]
    NotFound,

    #[error("{0}")]
    SessionNotFound(String),

    #[error("session exceeded max lifetime")]
    SessionExpired,

    #[error("{0}")]
    BackendUnavailable(String),
}

impl SsapError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::CapabilityDenied(_) => "CAPABILITY_DENIED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated | Self::TokenExpired => StatusCode::UNAUTHORIZED,
            Self::CapabilityDenied(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound | Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionExpired => StatusCode::GONE,
            Self::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for SsapError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retryable = matches!(
            status,
            StatusCode::LOCKED | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        );
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "retryable": retryable,
            }
        }));
        (status, body).into_response()
    }
}

/// Provider/store internals return `anyhow::Error`; at the handler boundary
/// anything not already a typed `SsapError` is backend unavailability.
impl From<anyhow::Error> for SsapError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<SsapError>() {
            Ok(typed) => typed,
            Err(err) => SsapError::BackendUnavailable(err.to_string()),
        }
    }
}

pub type SsapResult<T> = Result<T, SsapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_only_for_423_429_503() {
        assert!(SsapError::BackendUnavailable("x".into())
            .status()
            .eq(&StatusCode::SERVICE_UNAVAILABLE));
        assert!(!matches!(
            SsapError::SessionExpired.status(),
            StatusCode::LOCKED | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[test]
    fn wire_codes_match_status_taxonomy() {
        assert_eq!(SsapError::SessionNotFound("x".into()).code(), "SESSION_NOT_FOUND");
        assert_eq!(SsapError::SessionExpired.status(), StatusCode::GONE);
        assert_eq!(SsapError::CapabilityDenied("x".into()).status(), StatusCode::FORBIDDEN);
    }
}
