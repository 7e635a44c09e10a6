//! Token error types, stable error codes, and recovery hints.

use serde::{Deserialize, Serialize};

/// What the client should do next after a token is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// The token is dead for good; a fresh login is required.
    LogIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recovery {
    #[serde(flatten)]
    pub action: RecoveryAction,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("token expired at {exp}")]
    Expired { exp: i64 },
}

impl AuthError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::MalformedToken(_) => "malformed_token",
            Self::InvalidClaims(_) => "invalid_claims",
            Self::Expired { .. } => "token_expired",
        }
    }

    /// Token failures are never retried: every variant sends the user back
    /// to the login entry point.
    pub fn recovery(&self) -> Recovery {
        Recovery {
            action: RecoveryAction::LogIn,
        }
    }
}

/// Serializable form of an [`AuthError`], printed by `whoami --json` when the
/// stored token is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub recovery: Recovery,
}

impl From<&AuthError> for ErrorResponse {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.error_code().to_string(),
            message: err.to_string(),
            recovery: err.recovery(),
        }
    }
}
