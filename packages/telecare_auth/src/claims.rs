//! Bearer-token claims.
//!
//! Tokens are JWTs issued by the backend. The client never holds the signing
//! key, so decoding here reads the payload segment without verifying the
//! signature: it tells the client who the token belongs to and when it
//! expires. The backend stays the authority on validity; a forged token
//! fails the profile fetch that follows every decode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::encoding::base64_decode;
use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Doctor => "doctor",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Self::Patient),
            "doctor" => Ok(Self::Doctor),
            "admin" => Ok(Self::Admin),
            other => Err(AuthError::InvalidClaims(format!("unknown role: {other}"))),
        }
    }
}

/// Decoded token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    /// Expiry as a Unix timestamp in seconds.
    pub exp: i64,
}

impl Claims {
    /// Decode the payload segment of `token` without checking expiry.
    pub fn decode(token: &str) -> Result<Self, AuthError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::MalformedToken(
                "expected three dot-separated segments".into(),
            ));
        };
        if header.is_empty() || payload.is_empty() {
            return Err(AuthError::MalformedToken("empty segment".into()));
        }

        let bytes = base64_decode(payload)
            .map_err(|e| AuthError::MalformedToken(format!("payload: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidClaims(e.to_string()))
    }

    /// Decode `token` and reject it if it has expired at `now`.
    pub fn decode_unexpired(token: &str, now: i64) -> Result<Self, AuthError> {
        let claims = Self::decode(token)?;
        claims.check_expiry(now)?;
        Ok(claims)
    }

    /// A token is expired once `now` reaches `exp`; the expiry second itself
    /// is already invalid.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }

    pub fn check_expiry(&self, now: i64) -> Result<(), AuthError> {
        if self.is_expired_at(now) {
            return Err(AuthError::Expired { exp: self.exp });
        }
        Ok(())
    }
}

/// Build an unsigned token carrying `claims`. Only for tests: the backend
/// rejects it, but the client-side decode accepts it.
#[cfg(any(test, feature = "test-util"))]
pub fn mint_unsigned(claims: &Claims) -> String {
    use crate::encoding::base64_encode;

    let header = base64_encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = serde_json::to_vec(claims).expect("claims serialize");
    format!("{header}.{}.unsigned", base64_encode(&payload))
}
