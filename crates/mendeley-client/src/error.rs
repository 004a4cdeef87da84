//! Client error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure (connection, TLS, timeout)
    #[error("request failed: {0}")]
    Request(String),

    /// The API answered with a non-success status
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("rate limited by the Mendeley API")]
    RateLimited,

    /// Authentication failed and could not be refreshed
    #[error("not authorized; log in again")]
    Unauthorized,

    #[error("invalid redirect URI: {0}")]
    InvalidRedirect(String),

    /// The login flow was denied or broke down
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// Reading or writing the persisted token failed
    #[error("token storage error: {0}")]
    TokenStorage(#[from] std::io::Error),

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Parse(err.to_string())
    }
}
