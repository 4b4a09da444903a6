//! Request-scope principal extraction.
//!
//! Real ingress frameworks attach an authenticated identity to the request
//! scope before the handler ever runs; axum has no such concept, so the
//! identity is carried on an `x-ssap-identity` header instead. Absent that,
//! fall back to a hash of the caller's `Authorization` header, and failing
//! that, a fixed anonymous principal.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use sha2::{Digest, Sha256};

const IDENTITY_HEADER: &str = "x-ssap-identity";
const ANONYMOUS_PRINCIPAL: &str = "client:anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

impl Principal {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_parts(parts: &Parts) -> Self {
        if let Some(identity) = parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return Self(format!("user:{identity}"));
        }

        if let Some(auth) = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            let mut hasher = Sha256::new();
            hasher.update(auth.as_bytes());
            let digest = hex::encode(hasher.finalize());
            return Self(format!("auth:{}", &digest[..16]));
        }

        Self(ANONYMOUS_PRINCIPAL.to_string())
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}
