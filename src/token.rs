//! Capability token service: mint and verify HS256 tokens
//! bound to a session. A real `jsonwebtoken` contract, not hand-rolled HMAC
//! framing — the claims space here is wide enough (issuer, expiry, subject,
//! capability list) to want a library that enforces all of it at once.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::SsapError;
use crate::model::{Claims, SessionRecord};

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    iss: String,
    sub: String,
    sid: String,
    thread_id: String,
    sandbox_id: String,
    caps: Vec<String>,
    iat: i64,
    exp: i64,
    jti: String,
}

impl From<TokenClaims> for Claims {
    fn from(c: TokenClaims) -> Self {
        Self {
            iss: c.iss,
            sub: c.sub,
            sid: c.sid,
            thread_id: c.thread_id,
            sandbox_id: c.sandbox_id,
            caps: c.caps,
            iat: c.iat,
            exp: c.exp,
            jti: c.jti,
        }
    }
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl_minutes: u32,
    capabilities_ordered: Vec<String>,
}

impl TokenService {
    pub fn new(jwt_secret: &str, issuer: &str, ttl_minutes: u32, capabilities_ordered: Vec<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            issuer: issuer.to_string(),
            ttl_minutes,
            capabilities_ordered,
        }
    }

    fn new_jti() -> String {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Returns the signed token and its absolute expiry.
    pub fn issue(&self, record: &SessionRecord) -> Result<(String, chrono::DateTime<chrono::Utc>), SsapError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::minutes(self.ttl_minutes as i64);
        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: record.principal_id.clone(),
            sid: record.session_id.clone(),
            thread_id: record.thread_id.clone(),
            sandbox_id: record.sandbox_name.clone(),
            caps: self.capabilities_ordered.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Self::new_jti(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| SsapError::BackendUnavailable(format!("token signing failed: {e}")))?;
        Ok((token, exp))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, SsapError> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);
        // Capability tokens are short-lived and minted by this same process,
        // so there's no clock skew to absorb — expiry should bind exactly.
        validation.leeway = 0;

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => SsapError::TokenExpired,
                _ => SsapError::Unauthenticated,
            }
        })?;

        Ok(data.claims.into())
    }

    pub fn require_capability(claims: &Claims, cap: &str) -> Result<(), SsapError> {
        if claims.has_capability(cap) {
            Ok(())
        } else {
            Err(SsapError::CapabilityDenied(cap.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: "ssn_abcdef012345".into(),
            thread_id: "t-1".into(),
            principal_id: "alice".into(),
            sandbox_name: "sbx-1".into(),
            provider: "test".into(),
            dataplane_url: "http://127.0.0.1:1".into(),
            created_at: now,
            session_expires_at: now + chrono::Duration::hours(8),
        }
    }

    fn service() -> TokenService {
        TokenService::new("secret", "ssap", 60, vec!["execute".into(), "upload".into()])
    }

    #[test]
    fn issue_then_verify_round_trips_claims() {
        let svc = service();
        let record = record();
        let (token, _exp) = svc.issue(&record).unwrap();
        let claims = svc.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.sid, "ssn_abcdef012345");
        assert!(claims.has_capability("execute"));
    }

    #[test]
    fn wrong_secret_is_unauthenticated() {
        let svc = service();
        let (token, _) = svc.issue(&record()).unwrap();
        let other = TokenService::new("different-secret", "ssap", 60, vec!["execute".into()]);
        assert!(matches!(other.verify(&token), Err(SsapError::Unauthenticated)));
    }

    #[test]
    fn wrong_issuer_is_unauthenticated() {
        let svc = service();
        let (token, _) = svc.issue(&record()).unwrap();
        let other = TokenService::new("secret", "not-ssap", 60, vec!["execute".into()]);
        assert!(matches!(other.verify(&token), Err(SsapError::Unauthenticated)));
    }

    #[test]
    fn expired_token_is_token_expired() {
        let svc = TokenService::new("secret", "ssap", 0, vec!["execute".into()]);
        let record = record();
        let (token, _) = svc.issue(&record).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(matches!(svc.verify(&token), Err(SsapError::TokenExpired)));
    }

    #[test]
    fn require_capability_denies_missing_cap() {
        let svc = service();
        let (token, _) = svc.issue(&record()).unwrap();
        let claims = svc.verify(&token).unwrap();
        assert!(TokenService::require_capability(&claims, "upload").is_ok());
        assert!(matches!(
            TokenService::require_capability(&claims, "download"),
            Err(SsapError::CapabilityDenied(_))
        ));
    }
}
