//! Error taxonomy for the session layer.
//!
//! Every variant carries owned data only, so a single refresh failure can be
//! cloned and handed to every request that queued behind it.

use http::StatusCode;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The server answered but a required token or user field was missing.
    #[error("incomplete response: {0}")]
    IncompleteResponse(String),

    #[error("no refresh token is held by the session")]
    MissingRefreshToken,

    /// The server refused to mint a new access token.
    #[error("refresh rejected: {0}")]
    RefreshRejected(String),

    /// Transport level failure (connect, timeout, body decoding).
    #[error("network failure: {0}")]
    Network(String),

    #[error("unauthorized response from '{endpoint}'")]
    Unauthorized { endpoint: String },

    #[error("request to '{endpoint}' failed with status {status}: {message}")]
    Status {
        endpoint: String,
        status: StatusCode,
        message: String,
    },

    /// A logout or a new login happened while the operation was in flight.
    #[error("session changed while the operation was in flight")]
    SessionChanged,

    /// The request that was refreshing on behalf of the queue went away.
    #[error("token refresh was interrupted")]
    Interrupted,

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// True for the failures that mean the held credentials are no longer usable.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SessionError::MissingRefreshToken
                | SessionError::RefreshRejected(_)
                | SessionError::Unauthorized { .. }
        )
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_classified() {
        assert!(SessionError::MissingRefreshToken.is_auth_failure());
        assert!(SessionError::RefreshRejected("expired".into()).is_auth_failure());
        assert!(SessionError::Unauthorized {
            endpoint: "/api/auth/refresh".into()
        }
        .is_auth_failure());
        assert!(!SessionError::Network("timeout".into()).is_auth_failure());
        assert!(!SessionError::SessionChanged.is_auth_failure());
    }

    #[test]
    fn status_error_mentions_endpoint_and_status() {
        let err = SessionError::Status {
            endpoint: "/api/crops".into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "boom".into(),
        };
        let text = err.to_string();
        assert!(text.contains("/api/crops"));
        assert!(text.contains("500"));
    }
}
