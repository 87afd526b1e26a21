//! Error types for propmap-core
//!
//! `MappingError` is `Clone` so one failed cache load can be handed to every
//! caller waiting on it.

use propmap_model::ModelError;
use propmap_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MappingError {
    /// Device, product or schema missing during resolution
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The load task itself failed (panicked or was aborted)
    #[error("Cache load failed: {0}")]
    CacheLoad(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MappingError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn cache_load(msg: impl Into<String>) -> Self {
        Self::CacheLoad(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<StoreError> for MappingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DeviceNotFound(id) => Self::NotFound(format!("device {}", id)),
            StoreError::ProductNotFound(id) => Self::NotFound(format!("product {}", id)),
            StoreError::Model(e) => Self::Validation(e.to_string()),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<ModelError> for MappingError {
    fn from(err: ModelError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<figment::Error> for MappingError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MappingError>;
