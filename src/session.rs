//! Per-file import session.
//!
//! A session walks one file through a fixed, linear lifecycle:
//!
//! ```text
//! Created -> Connected -> SchemaReady -> Streaming -> Flushed -> Closed
//! ```
//!
//! `start` opens and pings the connection, `process_header` settles the
//! destination table, every `process_line` coerces one row into the batch, and
//! `end` flushes what is left before releasing the connection. The connection
//! is released on every exit path: by `end`, by `close`, or when the session
//! is dropped.

use log::{Level, info, log, warn};

use crate::{
    batch::{BatchWriter, row_literal},
    coerce::{Coercer, SemanticColumnType},
    config::{ColumnMapping, ImportConfig},
    error::{ImportError, Result},
    escape::sanitize_names,
    schema::{SchemaManager, TableAction, table_columns},
    storage::{Connector, Storage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connected,
    SchemaReady,
    Streaming,
    Flushed,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Connected => "connected",
            SessionState::SchemaReady => "schema-ready",
            SessionState::Streaming => "streaming",
            SessionState::Flushed => "flushed",
            SessionState::Closed => "closed",
        }
    }
}

/// What the file driver talks to. One service instance handles one file.
pub trait DbService {
    /// Connects with the file's resolved configuration.
    fn start(&mut self, file_name: &str, config: ImportConfig) -> Result<()>;

    /// Consumes the header row; must be called exactly once, before any line.
    fn process_header(&mut self, header: &[String]) -> Result<()>;

    /// Consumes one data row, in file order.
    fn process_line(&mut self, line: &[String]) -> Result<()>;

    /// Flushes pending rows and releases the connection, even if the flush
    /// fails.
    fn end(&mut self) -> Result<()>;

    /// Releases the connection without flushing. Safe to call repeatedly.
    fn close(&mut self);

    /// Data rows accepted so far.
    fn row_count(&self) -> usize;
}

#[derive(Debug, Clone)]
struct SessionColumn {
    name: String,
    mapping: ColumnMapping,
    semantic: SemanticColumnType,
}

pub struct ImportSession<C: Connector> {
    connector: C,
    state: SessionState,
    file_name: String,
    config: Option<ImportConfig>,
    storage: Option<C::Storage>,
    columns: Vec<SessionColumn>,
    coercer: Coercer,
    writer: Option<BatchWriter>,
    table_action: Option<TableAction>,
    row_count: usize,
    line: usize,
}

impl<C: Connector> ImportSession<C> {
    pub fn new(connector: C) -> Self {
        ImportSession {
            connector,
            state: SessionState::Created,
            file_name: String::new(),
            config: None,
            storage: None,
            columns: Vec::new(),
            coercer: Coercer::new(),
            writer: None,
            table_action: None,
            row_count: 0,
            line: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn table_action(&self) -> Option<TableAction> {
        self.table_action
    }

    /// Sanitized column names, in header order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn semantic_types(&self) -> Vec<SemanticColumnType> {
        self.columns.iter().map(|c| c.semantic).collect()
    }

    /// Rows the database accepted so far; queued rows are not counted.
    pub fn rows_written(&self) -> usize {
        self.writer.as_ref().map_or(0, BatchWriter::rows_written)
    }

    /// Insert statements sent so far.
    pub fn flush_count(&self) -> usize {
        self.writer.as_ref().map_or(0, BatchWriter::flush_count)
    }

    fn log_level(&self) -> Level {
        match &self.config {
            Some(config) if config.verbose => Level::Info,
            _ => Level::Debug,
        }
    }

    fn release(&mut self) {
        if let Some(storage) = self.storage.take() {
            if let Err(err) = storage.close() {
                warn!("Closing connection for {} failed: {err}", self.file_name);
            }
        }
        self.state = SessionState::Closed;
    }
}

fn invalid_state(operation: &'static str, state: SessionState) -> ImportError {
    ImportError::InvalidState {
        operation,
        state: state.as_str(),
    }
}

impl<C: Connector> DbService for ImportSession<C> {
    fn start(&mut self, file_name: &str, config: ImportConfig) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(invalid_state("start", self.state));
        }
        self.file_name = file_name.to_string();
        let connect_error = |source| ImportError::Connection {
            database: config.connection.db.clone(),
            source,
        };
        let mut storage = self
            .connector
            .connect(&config.connection)
            .map_err(connect_error)?;
        if let Err(source) = storage.ping() {
            if let Err(err) = storage.close() {
                warn!("Closing connection for {file_name} failed: {err}");
            }
            return Err(connect_error(source));
        }
        let level = if config.verbose { Level::Info } else { Level::Debug };
        log!(
            level,
            "Connected to {}@{}:{}/{} for {file_name}",
            config.connection.username,
            config.connection.host,
            config.connection.port,
            config.connection.db
        );
        self.storage = Some(storage);
        self.config = Some(config);
        self.state = SessionState::Connected;
        Ok(())
    }

    fn process_header(&mut self, header: &[String]) -> Result<()> {
        let state = self.state;
        if state != SessionState::Connected {
            return Err(invalid_state("process a header", state));
        }
        let (Some(config), Some(storage)) = (self.config.as_ref(), self.storage.as_mut()) else {
            return Err(invalid_state("process a header", state));
        };

        let names = sanitize_names(header);
        let columns = table_columns(config, &names);
        let ensured = SchemaManager::new(config).ensure_table(storage, &config.table, &columns)?;

        self.columns = names
            .iter()
            .zip(ensured.types)
            .map(|(name, semantic)| SessionColumn {
                name: name.clone(),
                mapping: config.mapping_for(name).cloned().unwrap_or_default(),
                semantic,
            })
            .collect();
        self.writer = Some(BatchWriter::new(
            &config.table,
            &names,
            config.bulk_insert_size,
            config.verbose,
        ));
        self.table_action = Some(ensured.action);
        self.line = 1;
        self.state = SessionState::SchemaReady;
        log!(
            self.log_level(),
            "Table {} ready for {} ({:?})",
            config.table,
            self.file_name,
            ensured.action
        );
        Ok(())
    }

    fn process_line(&mut self, line: &[String]) -> Result<()> {
        let state = self.state;
        if !matches!(state, SessionState::SchemaReady | SessionState::Streaming) {
            return Err(invalid_state("process a line", state));
        }
        let (Some(writer), Some(storage)) = (self.writer.as_mut(), self.storage.as_mut()) else {
            return Err(invalid_state("process a line", state));
        };
        self.state = SessionState::Streaming;
        self.line += 1;

        if line.len() != self.columns.len() {
            return Err(ImportError::ColumnCountMismatch {
                line: self.line,
                expected: self.columns.len(),
                found: line.len(),
            });
        }

        let mut values = Vec::with_capacity(line.len());
        for (column, raw) in self.columns.iter().zip(line) {
            values.push(
                self.coercer
                    .coerce(&column.name, &column.mapping, column.semantic, raw)?,
            );
        }
        writer.append(storage, row_literal(&values))?;
        self.row_count += 1;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        let state = self.state;
        if !matches!(state, SessionState::SchemaReady | SessionState::Streaming) {
            return Err(invalid_state("end", state));
        }
        let result = match (self.writer.as_mut(), self.storage.as_mut()) {
            (Some(writer), Some(storage)) => writer.finish(storage),
            _ => Err(invalid_state("end", state)),
        };
        self.state = SessionState::Flushed;
        if result.is_ok() {
            if let Some(config) = &self.config {
                info!(
                    "Imported {} row(s) from {} into {}",
                    self.row_count, self.file_name, config.table
                );
            }
        }
        self.release();
        result
    }

    fn close(&mut self) {
        self.release();
    }

    fn row_count(&self) -> usize {
        self.row_count
    }
}

impl<C: Connector> Drop for ImportSession<C> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_are_readable() {
        assert_eq!(SessionState::SchemaReady.as_str(), "schema-ready");
        let err = invalid_state("end", SessionState::Closed);
        assert_eq!(err.to_string(), "cannot end while session is closed");
    }
}
