//! Module loading errors.

use thiserror::Error;

use super::BoundaryError;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Module already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Module {module} cannot {operation} while {state}")]
    InvalidState {
        module: String,
        state: String,
        operation: String,
    },

    #[error("Invalid module manifest {path}: {reason}")]
    InvalidManifest { path: String, reason: String },

    #[error("Service configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("Module initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability description failed: {0}")]
    DescribeFailed(String),

    #[error("Module shutdown failed: {0}")]
    ShutdownFailed(String),

    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout")]
    Timeout,

    #[error("{0}")]
    Custom(String),
}
