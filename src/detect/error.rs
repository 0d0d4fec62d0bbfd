//! Detection service error types.

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A classification attempt that failed before a usable response was parsed.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("detection service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed detection response: {0}")]
    Malformed(String),
}

impl ServiceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ServiceError::Transport(e) if e.is_timeout())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Malformed(err.to_string())
    }
}
