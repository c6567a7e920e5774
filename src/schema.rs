//! Destination table management.
//!
//! Given the sanitized header of a file and its column mapping, the
//! [`SchemaManager`] makes sure the destination table exists: it drops or
//! truncates an existing table when configured to, creates a missing one from
//! the mapping, and finally resolves the [`SemanticColumnType`] of every
//! column. Existing tables are never altered; an incompatible table surfaces
//! as an insert error later on.
//!
//! DDL is not transactional in MySQL. If a DROP succeeds and the following
//! CREATE fails, the table is simply gone; nothing tries to restore it.

use std::collections::HashMap;

use itertools::Itertools;
use log::{Level, log};

use crate::{
    coerce::SemanticColumnType,
    config::ImportConfig,
    error::{ImportError, Result, StorageError},
    escape::{escape_string, quote_identifier},
    storage::Storage,
};

pub const AUTO_PK_COLUMN: &str = "`id` INT(11) NOT NULL AUTO_INCREMENT";
pub const AUTO_PK_INDEX: &str = "PRIMARY KEY(`id`)";

/// A header column together with the DDL it would be created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub definition: String,
    pub index: bool,
}

/// Builds the column list for a sanitized header.
pub fn table_columns(config: &ImportConfig, names: &[String]) -> Vec<TableColumn> {
    names
        .iter()
        .map(|name| TableColumn {
            name: name.clone(),
            definition: config.column_definition(name).to_string(),
            index: config.mapping_for(name).is_some_and(|m| m.index),
        })
        .collect()
}

/// What happened to the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAction {
    /// Existed and was left as is.
    Kept,
    /// Existed and was emptied.
    Truncated,
    /// Did not exist and was created.
    Created,
    /// Existed, was dropped, and was created again.
    Recreated,
}

impl TableAction {
    fn pre_existing(self) -> bool {
        matches!(self, TableAction::Kept | TableAction::Truncated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredTable {
    pub action: TableAction,
    pub types: Vec<SemanticColumnType>,
}

/// `CREATE TABLE` for a missing destination table. Column and index clauses
/// follow header order; table options are appended verbatim.
pub fn create_table_statement(
    table: &str,
    columns: &[TableColumn],
    auto_pk: bool,
    table_options: &str,
) -> String {
    let mut clauses = Vec::with_capacity(columns.len() + 2);
    if auto_pk {
        clauses.push(AUTO_PK_COLUMN.to_string());
    }
    for column in columns {
        clauses.push(format!(
            "{} {}",
            quote_identifier(&escape_string(&column.name)),
            column.definition
        ));
    }
    if auto_pk {
        clauses.push(AUTO_PK_INDEX.to_string());
    }
    for column in columns.iter().filter(|c| c.index) {
        let quoted = quote_identifier(&escape_string(&column.name));
        clauses.push(format!("INDEX {quoted} ({quoted})"));
    }

    let mut sql = format!(
        "CREATE TABLE {} (\n  {}\n)",
        quote_identifier(&escape_string(table)),
        clauses.iter().join(",\n  ")
    );
    let options = table_options.trim();
    if !options.is_empty() {
        sql.push(' ');
        sql.push_str(options);
    }
    sql
}

pub struct SchemaManager<'a> {
    config: &'a ImportConfig,
}

impl<'a> SchemaManager<'a> {
    pub fn new(config: &'a ImportConfig) -> Self {
        Self { config }
    }

    fn log_level(&self) -> Level {
        if self.config.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }

    /// Makes sure `table` exists and resolves the semantic type of each
    /// column. Every storage failure is returned as [`ImportError::Schema`].
    pub fn ensure_table<S: Storage>(
        &self,
        storage: &mut S,
        table: &str,
        columns: &[TableColumn],
    ) -> Result<EnsuredTable> {
        let quoted = quote_identifier(&escape_string(table));
        let mut exists = storage
            .table_exists(table)
            .map_err(schema_error(table, "checking whether it exists"))?;
        let mut action = TableAction::Kept;

        if exists && self.config.drop {
            log!(self.log_level(), "Dropping table {table}");
            storage
                .execute(&format!("DROP TABLE {quoted}"))
                .map_err(schema_error(table, "dropping it"))?;
            exists = false;
            action = TableAction::Recreated;
        } else if exists && self.config.truncate {
            log!(self.log_level(), "Truncating table {table}");
            storage
                .execute(&format!("TRUNCATE TABLE {quoted}"))
                .map_err(schema_error(table, "truncating it"))?;
            action = TableAction::Truncated;
        }

        if !exists {
            log!(self.log_level(), "Creating table {table}");
            let sql = create_table_statement(
                table,
                columns,
                self.config.auto_pk,
                &self.config.table_options,
            );
            storage
                .execute(&sql)
                .map_err(schema_error(table, "creating it"))?;
            if action != TableAction::Recreated {
                action = TableAction::Created;
            }
        }

        let types = if action.pre_existing() {
            self.introspected_types(storage, table, columns)?
        } else {
            columns
                .iter()
                .map(|column| SemanticColumnType::from_definition(&column.definition))
                .collect()
        };

        Ok(EnsuredTable { action, types })
    }

    /// The definition of a pre-existing table decides how values are coerced;
    /// the configured type is only a fallback for columns the table lacks.
    fn introspected_types<S: Storage>(
        &self,
        storage: &mut S,
        table: &str,
        columns: &[TableColumn],
    ) -> Result<Vec<SemanticColumnType>> {
        let existing: HashMap<String, String> = storage
            .column_types(table)
            .map_err(schema_error(table, "reading its column definitions"))?
            .into_iter()
            .map(|(name, definition)| (name.to_ascii_lowercase(), definition))
            .collect();

        Ok(columns
            .iter()
            .map(|column| {
                let definition = existing
                    .get(&column.name.to_ascii_lowercase())
                    .map(String::as_str)
                    .unwrap_or(&column.definition);
                SemanticColumnType::from_definition(definition)
            })
            .collect())
    }
}

fn schema_error(table: &str, action: &'static str) -> impl FnOnce(StorageError) -> ImportError {
    let table = table.to_string();
    move |source| ImportError::Schema {
        table,
        action,
        source,
    }
}
