//! Core data model: `SessionRecord` and the `(principal, thread)` binding
//! it's reachable through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable after creation except that `refresh` re-writes it with the same
/// `session_expires_at` — a cache-touch, never a lifetime extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub thread_id: String,
    pub principal_id: String,
    pub sandbox_name: String,
    pub provider: String,
    /// Absolute URL, trailing slash stripped.
    pub dataplane_url: String,
    pub created_at: DateTime<Utc>,
    pub session_expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.session_expires_at
    }

    /// Remaining lifetime, floored at zero, for TTL writes to the store.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.session_expires_at - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    Get,
    Ensure,
}

/// Claims carried by a capability token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub sid: String,
    pub thread_id: String,
    pub sandbox_id: String,
    pub caps: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn has_capability(&self, cap: &str) -> bool {
        self.caps.iter().any(|c| c == cap)
    }
}

/// The provider's description of a sandbox, returned from `create_sandbox`
/// and `get_sandbox`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxDescriptor {
    pub name: String,
    pub dataplane_url: String,
}
