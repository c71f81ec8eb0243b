use thiserror::Error;

/// Typed remote API errors.
///
/// `status_code()` lets the sync pipeline tell an identity rejection (401)
/// apart from everything else, and `is_retryable()` drives the client's
/// backoff loop.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("request to {url} failed: {source}")]
    Http { source: reqwest::Error, url: String },

    #[error("invalid response body from {url}: {source}")]
    Decode {
        source: serde_json::Error,
        url: String,
    },

    #[error("invalid server URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    /// HTTP status of the failed response, when the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::HttpStatus { status, .. } => Some(*status),
            ApiError::Http { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The server no longer accepts this user's identity.
    pub fn is_identity_rejection(&self) -> bool {
        self.status_code() == Some(401)
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ApiError::Http { source, .. } => !source.is_builder(),
            ApiError::Decode { .. }
            | ApiError::InvalidBaseUrl { .. }
            | ApiError::InvalidHeader(_)
            | ApiError::Cancelled => false,
        }
    }
}
