use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A stored value exists but no longer matches the expected shape.
    #[error("stored value under `{key}` is corrupted")]
    Corrupted {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a corruption error for the value stored under `key`.
    pub fn corrupted(key: impl Into<String>, source: serde_json::Error) -> Self {
        StorageError::Corrupted {
            key: key.into(),
            source,
        }
    }
}
