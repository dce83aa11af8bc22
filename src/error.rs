use thiserror::Error;

/// Typed error for client operations.
///
/// Distinguishes the failure categories callers react to differently:
/// auth (redirect or re-login), transport (retry/report), server-side
/// API rejections, in-band stream errors, and local validation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Session could not be resolved to an authenticated user.
    #[error("not authenticated")]
    Unauthenticated,

    /// Network-level failure (DNS, connection, timeout, body read).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Server returned a non-success HTTP status.
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Server reported an error inside a well-formed stream event.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Local input failed validation before any request was made.
    #[error("invalid input: {0}")]
    Validation(String),
}

impl ClientError {
    /// True for a credential-expired signal (HTTP 401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Api { status: 401, .. })
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
