//! Directory driver: finds CSV files, resolves their configuration, and feeds
//! each one through its own import session.
//!
//! One file's failure never stops the run. Every file yields exactly one
//! [`ImportFileStatus`], in file name order, and the collected statuses form
//! the [`RunSummary`] handed to the notifiers.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::{error, info};

use crate::{
    config::{self, ImportConfig},
    escape::sanitize_names,
    io_utils,
    notify::{ImportFileStatus, RunSummary},
    schema::{create_table_statement, table_columns},
    session::{DbService, ImportSession},
    storage::Connector,
};

/// CSV files directly inside `dir`, sorted by name. The extension match is
/// case-insensitive.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Listing directory {dir:?}"))? {
        let path = entry
            .with_context(|| format!("Listing directory {dir:?}"))?
            .path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Loads, merges, and resolves the configuration that applies to `path`.
pub fn resolve_file_config(path: &Path, global: Option<&Path>) -> Result<ImportConfig> {
    let merged = config::load_for_file(path, global)?;
    let config = ImportConfig::resolve(&file_name_of(path), merged)
        .with_context(|| format!("Resolving configuration for {path:?}"))?;
    Ok(config)
}

/// Streams one file into `service`: header first, then every data row, then
/// `end`. Returns the number of rows imported. The caller is responsible for
/// closing the service when this fails.
pub fn import_file<D: DbService>(
    service: &mut D,
    path: &Path,
    config: ImportConfig,
) -> Result<usize> {
    let file_name = file_name_of(path);
    let encoding = config.encoding;
    let mut reader = io_utils::open_csv_reader_from_path(path, config.delimiter)?;
    service.start(&file_name, config)?;

    let mut records = reader.byte_records();
    let header = records
        .next()
        .ok_or_else(|| anyhow!("{file_name} has no header row"))?
        .with_context(|| format!("Reading header of {path:?}"))?;
    service.process_header(&io_utils::decode_record(&header, encoding)?)?;

    for (idx, record) in records.enumerate() {
        let line = idx + 2;
        let record = record.with_context(|| format!("Reading line {line} of {path:?}"))?;
        let cells = io_utils::decode_record(&record, encoding)
            .with_context(|| format!("Decoding line {line} of {path:?}"))?;
        service.process_line(&cells)?;
    }

    service.end()?;
    Ok(service.row_count())
}

/// Runs imports against whatever storage `C` connects to.
pub struct Importer<C> {
    connector: C,
    global_config: Option<PathBuf>,
}

impl<C: Connector + Clone> Importer<C> {
    pub fn new(connector: C) -> Self {
        Importer {
            connector,
            global_config: None,
        }
    }

    /// Uses `path` instead of looking for `csv2table.*` in the import
    /// directory.
    pub fn with_global_config(mut self, path: Option<PathBuf>) -> Self {
        self.global_config = path;
        self
    }

    pub fn run(&self, dir: &Path) -> Result<RunSummary> {
        let global = config::global_config_path(dir, self.global_config.as_deref())?;
        let files = list_csv_files(dir)?;
        if files.is_empty() {
            info!("No files found in {dir:?}");
        } else {
            info!("Found {} file(s) to import in {dir:?}", files.len());
        }

        let statuses = files
            .iter()
            .map(|path| self.import_path(path, global.as_deref()))
            .collect();
        Ok(RunSummary::from_statuses(statuses))
    }

    /// Imports one file and reports its outcome instead of failing.
    pub fn import_path(&self, path: &Path, global: Option<&Path>) -> ImportFileStatus {
        let file_name = file_name_of(path);
        let mut session = ImportSession::new(self.connector.clone());
        let outcome = resolve_file_config(path, global)
            .and_then(|config| import_file(&mut session, path, config));
        match outcome {
            Ok(rows) => ImportFileStatus::success(file_name, rows),
            Err(err) => {
                session.close();
                error!("Importing {file_name} failed: {err:#}");
                ImportFileStatus::failure(file_name, format!("{err:#}"), session.rows_written())
            }
        }
    }
}

/// Resolves the configuration for `path` and checks that its database is
/// reachable.
pub fn check_file<C: Connector>(connector: C, path: &Path, global: Option<&Path>) -> Result<ImportConfig> {
    let config = resolve_file_config(path, global)?;
    let mut session = ImportSession::new(connector);
    session
        .start(&file_name_of(path), config.clone())
        .with_context(|| format!("Checking connection for {path:?}"))?;
    session.close();
    Ok(config)
}

/// The `CREATE TABLE` statement the import of `path` would issue if its
/// destination table did not exist yet.
pub fn plan_file(path: &Path, global: Option<&Path>) -> Result<String> {
    let config = resolve_file_config(path, global)?;
    let mut reader = io_utils::open_csv_reader_from_path(path, config.delimiter)?;
    let header = reader
        .byte_records()
        .next()
        .ok_or_else(|| anyhow!("{} has no header row", file_name_of(path)))?
        .with_context(|| format!("Reading header of {path:?}"))?;
    let names = sanitize_names(&io_utils::decode_record(&header, config.encoding)?);
    let columns = table_columns(&config, &names);
    Ok(create_table_statement(
        &config.table,
        &columns,
        config.auto_pk,
        &config.table_options,
    ))
}

/// The global configuration in effect for `dir`, if any.
pub fn global_config_for(dir: &Path, explicit: Option<&Path>) -> Result<Option<config::ConfigFile>> {
    config::global_config_path(dir, explicit)?
        .map(|path| config::ConfigFile::load(&path))
        .transpose()
}
