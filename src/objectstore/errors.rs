//! Object store error types
//!
//! Maps HTTP status codes to specific variants so callers can tell a missing
//! object apart from a transport fault and decide whether to retry.

/// Object store error types
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request error: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ObjectStoreError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::Network(_) | Self::Server(_, _)
        )
    }

    /// Whether the object or bucket simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Forbidden(_) => Some("Check access_key and secret_key in the [remote] config"),
            Self::Network(_) => Some("Check that the [remote] endpoint is reachable"),
            _ => None,
        }
    }

    /// Create an error from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::Forbidden(body.to_string()),
            404 => Self::NotFound(body.to_string()),
            408 => Self::Timeout,
            429 | 503 => Self::RateLimited,
            500..=599 => Self::Server(status, body.to_string()),
            _ => Self::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for ObjectStoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Network(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), &err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}
