//! Error types for propmap-calc

use thiserror::Error;

/// Transformation errors
///
/// These never leave [`crate::TransformEngine::apply`]; they are logged and
/// counted, and the raw value is returned instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalcError {
    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Value is not numeric: {0}")]
    NonNumeric(String),

    #[error("Result is not a finite number: {0}")]
    NonFinite(String),
}

impl CalcError {
    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }

    pub fn non_numeric(value: impl Into<String>) -> Self {
        Self::NonNumeric(value.into())
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;
