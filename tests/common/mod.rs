#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use csv2table::config::{ConfigFile, ConnectionParams, ImportConfig};
use csv2table::error::StorageError;
use csv2table::storage::{Connector, Storage};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Resolves an import configuration from TOML text.
pub fn import_config(file_name: &str, toml_text: &str) -> ImportConfig {
    let file: ConfigFile = toml::from_str(toml_text).expect("parse test config");
    ImportConfig::resolve(file_name, file).expect("resolve test config")
}

/// Everything the recording backend saw, shared by the connector and every
/// storage it opened.
#[derive(Debug, Default)]
pub struct Recorded {
    pub statements: Vec<String>,
    pub tables: BTreeMap<String, Vec<(String, String)>>,
    pub fail_on: Vec<String>,
    pub fail_containing: Vec<String>,
    pub connect_error: Option<String>,
    pub ping_error: Option<String>,
    pub connected_to: Vec<ConnectionParams>,
    pub pings: usize,
    pub closes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    pub state: Rc<RefCell<Recorded>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pre-existing table with its column definitions.
    pub fn with_table(self, name: &str, columns: &[(&str, &str)]) -> Self {
        self.state.borrow_mut().tables.insert(
            name.to_string(),
            columns
                .iter()
                .map(|(column, definition)| (column.to_string(), definition.to_string()))
                .collect(),
        );
        self
    }

    /// Makes every statement starting with `prefix` fail.
    pub fn fail_on(self, prefix: &str) -> Self {
        self.state.borrow_mut().fail_on.push(prefix.to_string());
        self
    }

    /// Rejects any statement that contains `fragment`.
    pub fn fail_containing(self, fragment: &str) -> Self {
        self.state.borrow_mut().fail_containing.push(fragment.to_string());
        self
    }

    pub fn refuse_connections(self, message: &str) -> Self {
        self.state.borrow_mut().connect_error = Some(message.to_string());
        self
    }

    pub fn fail_ping(self, message: &str) -> Self {
        self.state.borrow_mut().ping_error = Some(message.to_string());
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.borrow().statements.clone()
    }

    pub fn statements_starting_with(&self, prefix: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| sql.starts_with(prefix))
            .collect()
    }

    pub fn inserts(&self) -> Vec<String> {
        self.statements_starting_with("INSERT")
    }

    /// Statements other than inserts.
    pub fn ddl(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| !sql.starts_with("INSERT"))
            .collect()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.borrow().tables.contains_key(name)
    }

    pub fn closes(&self) -> usize {
        self.state.borrow().closes
    }

    pub fn connections(&self) -> usize {
        self.state.borrow().connected_to.len()
    }

    /// Opens a storage directly, bypassing any session.
    pub fn open(&self) -> RecordingStorage {
        RecordingStorage {
            state: Rc::clone(&self.state),
        }
    }
}

impl Connector for RecordingConnector {
    type Storage = RecordingStorage;

    fn connect(&self, params: &ConnectionParams) -> Result<RecordingStorage, StorageError> {
        let mut state = self.state.borrow_mut();
        if let Some(message) = &state.connect_error {
            return Err(StorageError::message(message.clone()));
        }
        state.connected_to.push(params.clone());
        Ok(RecordingStorage {
            state: Rc::clone(&self.state),
        })
    }
}

pub struct RecordingStorage {
    state: Rc<RefCell<Recorded>>,
}

fn quoted_name(sql: &str) -> Option<String> {
    sql.split('`').nth(1).map(str::to_string)
}

impl Storage for RecordingStorage {
    fn ping(&mut self) -> Result<(), StorageError> {
        let mut state = self.state.borrow_mut();
        state.pings += 1;
        match &state.ping_error {
            Some(message) => Err(StorageError::message(message.clone())),
            None => Ok(()),
        }
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, StorageError> {
        Ok(self.state.borrow().tables.contains_key(table))
    }

    fn column_types(&mut self, table: &str) -> Result<Vec<(String, String)>, StorageError> {
        Ok(self
            .state
            .borrow()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    fn execute(&mut self, sql: &str) -> Result<u64, StorageError> {
        let mut state = self.state.borrow_mut();
        state.statements.push(sql.to_string());
        if let Some(prefix) = state.fail_on.iter().find(|prefix| sql.starts_with(prefix.as_str())) {
            return Err(StorageError::message(format!("rejected by test: {prefix}")));
        }
        if let Some(fragment) = state.fail_containing.iter().find(|f| sql.contains(f.as_str())) {
            return Err(StorageError::message(format!("rejected by test: {fragment}")));
        }
        if sql.starts_with("DROP TABLE") {
            if let Some(name) = quoted_name(sql) {
                state.tables.remove(&name);
            }
        } else if sql.starts_with("CREATE TABLE") {
            if let Some(name) = quoted_name(sql) {
                state.tables.insert(name, Vec::new());
            }
        } else if sql.starts_with("INSERT") {
            return Ok(sql.lines().count().saturating_sub(1) as u64);
        }
        Ok(0)
    }

    fn close(self) -> Result<(), StorageError> {
        self.state.borrow_mut().closes += 1;
        Ok(())
    }
}
