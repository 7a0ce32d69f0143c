//! Validation error model.

use thiserror::Error;

/// Result type for argument validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Rejected input.
///
/// Raised synchronously at the API boundary, before anything is enqueued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A field had an unacceptable value.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A queue or job type name is not known.
    #[error("unknown name: {0}")]
    UnknownName(String),
}

impl ValidationError {
    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown_name(name: impl Into<String>) -> Self {
        Self::UnknownName(name.into())
    }
}
