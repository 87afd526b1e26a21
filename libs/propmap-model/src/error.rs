//! Model layer error types

use thiserror::Error;

/// Result type for propmap-model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model layer errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Transformation config could not be interpreted
    #[error("Invalid transformation config: {0}")]
    InvalidTransformation(String),

    /// Rule or schema failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ModelError {
    pub fn invalid_transformation(msg: impl Into<String>) -> Self {
        Self::InvalidTransformation(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
