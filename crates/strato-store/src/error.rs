//! Error types for the property cache.

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid backend configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Backend error.
    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Backend("table missing".to_string());
        assert!(err.to_string().contains("table missing"));
    }
}
