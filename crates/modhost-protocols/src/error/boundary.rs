//! Errors raised while crossing a module boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("Unknown boundary kind: {0}")]
    UnknownKind(String),

    #[error("Boundary entry not found: {0}")]
    EntryNotFound(String),

    #[error("Failed to spawn module process: {0}")]
    Spawn(String),

    #[error("Boundary protocol error: {0}")]
    Protocol(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Boundary closed")]
    Closed,

    #[error("Boundary already released")]
    Released,

    #[error("Boundary request timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
