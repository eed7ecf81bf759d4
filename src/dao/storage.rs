use std::error::Error;
use thiserror::Error;

use crate::dao::models::Table;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached or dropped the request.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The store refused the request (constraint violation, malformed row).
    #[error("`{table}` rejected the request: {message}")]
    Rejected { table: &'static str, message: String },
    /// A row returned by the store does not match the expected shape.
    #[error("failed to decode `{table}` row")]
    Decode {
        table: &'static str,
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

    /// Construct a rejection for `table`.
    pub fn rejected(table: Table, message: impl Into<String>) -> Self {
        StorageError::Rejected {
            table: table.name(),
            message: message.into(),
        }
    }

    /// Construct a decode failure for `table`.
    pub fn decode(table: Table, source: serde_json::Error) -> Self {
        StorageError::Decode {
            table: table.name(),
            source,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}
