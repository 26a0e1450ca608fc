use std::time::Duration;

/// Typed failures of the completion collaborator.
///
/// The producer treats every variant identically (the session ends with a
/// visible system line); the classification exists for logs and callers that
/// want to tell an outage from a bad credential.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("upstream error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("empty completion")]
    EmptyCompletion,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited(_) => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::EmptyCompletion => "empty_completion",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Classify a non-success HTTP status into the appropriate variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            429 => Self::RateLimited(body),
            400..=499 => Self::InvalidRequest(format!("status {status}: {body}")),
            _ => Self::ServerError { status, body },
        }
    }
}
