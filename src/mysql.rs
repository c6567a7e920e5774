//! MySQL backend built on `sqlx`.
//!
//! The import pipeline is synchronous, so each storage owns a current-thread
//! tokio runtime and blocks on every call. Statements are sent over the text
//! protocol; identifiers and literals were escaped by the caller.

use log::debug;
use sqlx::{
    ConnectOptions, Connection, Executor,
    mysql::{MySqlConnectOptions, MySqlConnection},
};
use tokio::runtime::{Builder, Runtime};

use crate::{
    config::ConnectionParams,
    error::StorageError,
    storage::{Connector, Storage},
};

const TABLE_EXISTS_SQL: &str = "SELECT COUNT(*) FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?";

const COLUMN_TYPES_SQL: &str = "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR) \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl Connector for MySqlConnector {
    type Storage = MySqlStorage;

    fn connect(&self, params: &ConnectionParams) -> Result<MySqlStorage, StorageError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let mut options = MySqlConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.username)
            .database(&params.db)
            .disable_statement_logging();
        if let Some(password) = &params.password {
            options = options.password(password);
        }
        debug!(
            "Connecting to mysql://{}@{}:{}/{}",
            params.username, params.host, params.port, params.db
        );
        let connection = runtime.block_on(options.connect())?;
        Ok(MySqlStorage {
            connection,
            runtime,
        })
    }
}

/// A single MySQL connection. The connection is declared first so that it is
/// dropped while its runtime is still alive.
pub struct MySqlStorage {
    connection: MySqlConnection,
    runtime: Runtime,
}

impl Storage for MySqlStorage {
    fn ping(&mut self) -> Result<(), StorageError> {
        self.runtime.block_on(self.connection.ping())?;
        Ok(())
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, StorageError> {
        let count: i64 = self.runtime.block_on(
            sqlx::query_scalar(TABLE_EXISTS_SQL)
                .bind(table)
                .fetch_one(&mut self.connection),
        )?;
        Ok(count > 0)
    }

    fn column_types(&mut self, table: &str) -> Result<Vec<(String, String)>, StorageError> {
        let rows: Vec<(String, String)> = self.runtime.block_on(
            sqlx::query_as(COLUMN_TYPES_SQL)
                .bind(table)
                .fetch_all(&mut self.connection),
        )?;
        Ok(rows)
    }

    fn execute(&mut self, sql: &str) -> Result<u64, StorageError> {
        let result = self
            .runtime
            .block_on((&mut self.connection).execute(sql))?;
        Ok(result.rows_affected())
    }

    fn close(self) -> Result<(), StorageError> {
        let MySqlStorage {
            connection,
            runtime,
        } = self;
        runtime.block_on(connection.close())?;
        Ok(())
    }
}
