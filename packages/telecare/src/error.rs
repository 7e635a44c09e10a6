//! Transport-level errors for the REST and real-time collaborators.

use serde::Deserialize;
use tokio_tungstenite::tungstenite;

/// Failure of a REST call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,

    /// Non-2xx response, or a 2xx whose body carries an `error` field.
    /// `message` is that field when present.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// Rejected before sending.
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Shape of a non-2xx response body.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }

    /// Build a `Status` error from a response's code and raw body.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.error)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        Self::Status {
            status: status.as_u16(),
            message,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

/// Failure to open or drive a live channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("live channel is unavailable")]
    Unavailable,

    #[error("channel already closed")]
    Closed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChannelError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}
