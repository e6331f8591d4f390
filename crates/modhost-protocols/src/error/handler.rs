//! Handler-related errors.

use thiserror::Error;

use super::BoundaryError;

/// Error raised by a command, event, job or validator handler.
///
/// The dispatcher converts these into failure results; they never escape
/// a dispatch call.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error("{0}")]
    Custom(String),
}

impl HandlerError {
    /// Build a handler error from any displayable failure.
    pub fn execution(err: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed(err.to_string())
    }

    /// Convert a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}
