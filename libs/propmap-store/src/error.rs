//! Error types for propmap-store

use propmap_model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid rule: {0}")]
    Model(#[from] ModelError),
}

impl StoreError {
    pub fn device_not_found(id: impl Into<String>) -> Self {
        Self::DeviceNotFound(id.into())
    }

    pub fn product_not_found(id: impl Into<String>) -> Self {
        Self::ProductNotFound(id.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_) | Self::ProductNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
