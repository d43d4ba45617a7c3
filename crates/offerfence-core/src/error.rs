use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Transport error: {0}")]
    Api(#[from] ApiError),

    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Api(e) => e.is_transient(),
            EngineError::Io(_) => true,
            _ => false,
        }
    }

    /// Rejected for missing or bad credentials; retrying can succeed once
    /// they are fixed.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Api(ApiError::Unauthorized | ApiError::AccessDenied(_))
        )
    }
}
