//! Error types for the import engine.
//!
//! [`StorageError`] is what a storage backend reports; [`ImportError`] is what
//! the session hands back to the driver, classified by the stage that failed.

use thiserror::Error;

/// Result alias used throughout the session and its collaborators.
pub type Result<T> = std::result::Result<T, ImportError>;

/// Failure reported by a [`crate::storage::Storage`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error("storage runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("{0}")]
    Message(String),
}

impl StorageError {
    pub fn message(text: impl Into<String>) -> Self {
        StorageError::Message(text.into())
    }
}

/// Failure of one file's import, by stage.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Connecting or the liveness check failed; the file is aborted.
    #[error("connection to database '{database}' failed: {source}")]
    Connection {
        database: String,
        #[source]
        source: StorageError,
    },

    /// Existence check, DROP, TRUNCATE, CREATE or introspection failed.
    /// A DROP that succeeded before a failed CREATE is not rolled back.
    #[error("schema error on table '{table}' while {action}: {source}")]
    Schema {
        table: String,
        action: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("column '{column}': value '{value}' does not match format '{layout}'")]
    Format {
        column: String,
        value: String,
        layout: String,
    },

    #[error("line {line}: expected {expected} column(s) but found {found}")]
    ColumnCountMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },

    /// A multi-row insert failed. The destination does not say which row was
    /// rejected, only that the batch of `rows` rows was not written.
    #[error("insert of {rows} row(s) into '{table}' failed: {source}")]
    Write {
        table: String,
        rows: usize,
        #[source]
        source: StorageError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}
