//! Data store errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_store_error() {
        assert_eq!(StoreError::Custom("locked".to_string()).to_string(), "locked");
    }

    #[test]
    fn test_io_store_error() {
        let err: StoreError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(err.to_string().starts_with("IO error"));
    }
}
