use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The single pinned signing algorithm. Tokens whose header declares anything
/// else are rejected outright, which closes the algorithm-downgrade hole.
const PINNED_ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims
///
/// The signed payload carried inside every identity token. The subject is the
/// user's UUID; role and existence are re-resolved from the store on each
/// request so a stale token cannot carry a revoked privilege.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the UUID of the authenticated user.
    pub sub: Uuid,
    /// Expiration time. Always `iat` plus the fixed token lifetime.
    pub exp: usize,
    /// Issued-at time.
    pub iat: usize,
}

/// AuthError
///
/// The three distinguishable ways a presented token can be unusable. The
/// distinction matters for logging and for tests; the caller always sees 401.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token has expired")]
    Expired,
    #[error("token signature could not be verified")]
    BadSignature,
    #[error("token is malformed")]
    Malformed,
}

struct CodecInner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

/// TokenCodec
///
/// Signs and validates identity tokens. A pure function of its input plus the
/// shared signing secret — no per-request state, no side effects.
#[derive(Clone)]
pub struct TokenCodec {
    inner: Arc<CodecInner>,
}

impl TokenCodec {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        Self {
            inner: Arc::new(CodecInner {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
                lifetime,
            }),
        }
    }

    /// Issues a signed token for `user_id` with `iat = now` and
    /// `exp = now + lifetime`.
    pub fn issue(&self, user_id: Uuid) -> jsonwebtoken::errors::Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id,
            iat: now,
            exp: now + self.inner.lifetime.as_secs() as usize,
        };
        encode(&Header::new(PINNED_ALGORITHM), &claims, &self.inner.encoding)
    }

    /// Parses and validates a token, returning its claims.
    ///
    /// The checks run in a fixed order so the error categories stay
    /// distinguishable:
    /// 1. header parse + pinned-algorithm check (`Malformed` / `BadSignature`),
    /// 2. expiry on the unverified claims — an expired token reports
    ///    `Expired` no matter what key signed it,
    /// 3. full signature verification (`BadSignature`).
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::Malformed)?;
        if header.alg != PINNED_ALGORITHM {
            return Err(AuthError::BadSignature);
        }

        // Peek at the claims without verifying the signature. This only
        // decides Expired vs not; nothing from this pass is trusted.
        let mut unverified = Validation::new(PINNED_ALGORITHM);
        unverified.insecure_disable_signature_validation();
        unverified.validate_exp = false;
        let peek = decode::<Claims>(token, &self.inner.decoding, &unverified)
            .map_err(|_| AuthError::Malformed)?;
        if peek.claims.exp <= Utc::now().timestamp() as usize {
            return Err(AuthError::Expired);
        }

        let mut validation = Validation::new(PINNED_ALGORITHM);
        validation.validate_exp = true;
        let verified =
            decode::<Claims>(token, &self.inner.decoding, &validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::Expired,
                    ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                        AuthError::BadSignature
                    }
                    _ => AuthError::Malformed,
                }
            })?;

        Ok(verified.claims)
    }
}

/// Extracts the raw token from an `Authorization` header value. Only the
/// exact `Bearer ` scheme is honored; anything else yields `None`.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ")
}
