//! The storage capability the import session is written against.
//!
//! The session never talks to a driver directly: it opens a [`Storage`]
//! through a [`Connector`] and issues plain SQL text through it. The only
//! production backend is [`crate::mysql::MySqlConnector`].

use crate::{config::ConnectionParams, error::StorageError};

/// One open connection to the destination database.
pub trait Storage {
    /// Liveness check run right after connecting.
    fn ping(&mut self) -> Result<(), StorageError>;

    /// Whether `table` (unescaped name) exists in the current database.
    fn table_exists(&mut self, table: &str) -> Result<bool, StorageError>;

    /// `(column name, column type definition)` pairs of an existing table, in
    /// ordinal order.
    fn column_types(&mut self, table: &str) -> Result<Vec<(String, String)>, StorageError>;

    /// Executes one statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, StorageError>;

    fn close(self) -> Result<(), StorageError>
    where
        Self: Sized;
}

/// Opens storage connections from resolved connection parameters.
pub trait Connector {
    type Storage: Storage;

    fn connect(&self, params: &ConnectionParams) -> Result<Self::Storage, StorageError>;
}
