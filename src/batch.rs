//! Multi-row insert batching.
//!
//! Rows arrive as ready-made literal tuples (`('a',NULL,'b')`) and are held
//! until `bulk_insert_size` of them are pending, at which point a single
//! `INSERT ... VALUES` carrying all of them is sent. The pending buffer is
//! cleared after each flush and its allocation reused.

use itertools::Itertools;
use log::{Level, log};

use crate::{
    error::{ImportError, Result},
    escape::{escape_string, quote_identifier},
    storage::Storage,
};

/// Renders one row as a parenthesized literal list. Values are escaped here;
/// `None` becomes a bare `NULL`.
pub fn row_literal(values: &[Option<String>]) -> String {
    let body = values
        .iter()
        .map(|value| match value {
            Some(text) => format!("'{}'", escape_string(text)),
            None => "NULL".to_string(),
        })
        .join(",");
    format!("({body})")
}

#[derive(Debug)]
pub struct BatchWriter {
    table: String,
    prefix: String,
    capacity: usize,
    pending: Vec<String>,
    flushes: usize,
    rows_written: usize,
    verbose: bool,
}

impl BatchWriter {
    /// `table` and `columns` are raw (unescaped) names. A zero capacity is
    /// treated as one.
    pub fn new(table: &str, columns: &[String], bulk_insert_size: usize, verbose: bool) -> Self {
        let column_list = columns
            .iter()
            .map(|column| quote_identifier(&escape_string(column)))
            .join(",");
        let prefix = format!(
            "INSERT INTO {} ({column_list}) VALUES\n",
            quote_identifier(&escape_string(table))
        );
        let capacity = bulk_insert_size.max(1);
        BatchWriter {
            table: table.to_string(),
            prefix,
            capacity,
            pending: Vec::with_capacity(capacity),
            flushes: 0,
            rows_written: 0,
            verbose,
        }
    }

    /// Queues one row literal and flushes once the batch is full.
    pub fn append<S: Storage>(&mut self, storage: &mut S, row: String) -> Result<()> {
        self.pending.push(row);
        if self.pending.len() >= self.capacity {
            self.flush(storage)?;
        }
        Ok(())
    }

    /// Sends every pending row in one statement. Does nothing when the batch
    /// is empty. On failure the batch is discarded and the error reports how
    /// many rows it held.
    pub fn flush<S: Storage>(&mut self, storage: &mut S) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = self.pending.len();
        let mut sql = String::with_capacity(
            self.prefix.len() + self.pending.iter().map(|row| row.len() + 2).sum::<usize>(),
        );
        sql.push_str(&self.prefix);
        sql.push_str(&self.pending.join(",\n"));
        self.pending.clear();

        let level = if self.verbose { Level::Info } else { Level::Debug };
        log!(level, "Inserting {rows} row(s) into {}", self.table);
        storage
            .execute(&sql)
            .map_err(|source| ImportError::Write {
                table: self.table.clone(),
                rows,
                source,
            })?;
        self.flushes += 1;
        self.rows_written += rows;
        Ok(())
    }

    /// End of stream: writes whatever is left.
    pub fn finish<S: Storage>(&mut self, storage: &mut S) -> Result<()> {
        self.flush(storage)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of successful insert statements so far.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}
