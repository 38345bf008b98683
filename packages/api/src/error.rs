use thiserror::Error;

/// Failure of a call to the remote API.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The server could not be reached. Safe to retry later.
    #[error("network error: {0}")]
    Network(String),

    /// The token is missing, expired or lacks permission (401/403).
    #[error("not authorised: {0}")]
    Auth(String),

    #[error("record not found")]
    NotFound,

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered with something that is not the expected JSON.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ApiError::Auth(if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body
            }),
            404 => ApiError::NotFound,
            _ => ApiError::Status { status, body },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
