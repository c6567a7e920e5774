//! Import configuration: the on-disk schema, merging, and resolution.
//!
//! Configuration comes from up to two files per CSV: a global
//! `csv2table.toml` (or `.yaml`/`.yml`) in the import directory and a per-file
//! `<stem>.toml` next to the CSV. Both deserialize into [`ConfigFile`], where
//! every key is optional. [`ConfigFile::merge`] layers the per-file values over
//! the global ones key by key (column mappings field by field), and
//! [`ImportConfig::resolve`] applies defaults and validates the result. The
//! resolved config is immutable for the lifetime of a session.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{
    error::ImportError,
    escape::sanitize_name,
    io_utils,
    notify::NotifyConfig,
};

pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_USERNAME: &str = "root";
pub const DEFAULT_BULK_INSERT_SIZE: usize = 5000;
pub const DEFAULT_COLUMN_TYPE: &str = "VARCHAR(255) NULL DEFAULT NULL";
pub const DEFAULT_TABLE_OPTIONS: &str = "COLLATE='utf8_general_ci' ENGINE=InnoDB";
pub const GLOBAL_CONFIG_STEM: &str = "csv2table";

const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml"];

/// One column's settings as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ColumnMappingFile {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_if: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_if_empty: Option<bool>,
}

impl ColumnMappingFile {
    fn merge(self, overrides: ColumnMappingFile) -> ColumnMappingFile {
        ColumnMappingFile {
            column_type: overrides.column_type.or(self.column_type),
            index: overrides.index.or(self.index),
            format: overrides.format.or(self.format),
            null_if: overrides.null_if.or(self.null_if),
            null_if_empty: overrides.null_if_empty.or(self.null_if_empty),
        }
    }
}

/// A configuration file as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    pub db: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mapping: BTreeMap<String, ColumnMappingFile>,
    pub drop: Option<bool>,
    pub truncate: Option<bool>,
    pub auto_pk: Option<bool>,
    pub default_col_type: Option<String>,
    pub table_options: Option<String>,
    pub bulk_insert_size: Option<usize>,
    pub verbose: Option<bool>,
    pub delimiter: Option<String>,
    pub encoding: Option<String>,
    pub notify: Option<NotifyConfig>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("Reading config file {path:?}"))?;
        match extension(path).as_deref() {
            Some("toml") => {
                toml::from_str(&raw).with_context(|| format!("Parsing TOML config {path:?}"))
            }
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
                .with_context(|| format!("Parsing YAML config {path:?}")),
            _ => bail!("Unsupported config file extension for {path:?} (expected .toml, .yaml or .yml)"),
        }
    }

    /// Layers `overrides` on top of `self`; any key set in `overrides` wins.
    /// Column mappings are matched by sanitized name, so `Amount` in one file
    /// and `amount` in the other refer to the same column.
    pub fn merge(self, overrides: ConfigFile) -> ConfigFile {
        let mut mapping = sanitized_mapping(self.mapping);
        for (column, column_overrides) in sanitized_mapping(overrides.mapping) {
            let merged = match mapping.remove(&column) {
                Some(base) => base.merge(column_overrides),
                None => column_overrides,
            };
            mapping.insert(column, merged);
        }

        ConfigFile {
            db: overrides.db.or(self.db),
            host: overrides.host.or(self.host),
            port: overrides.port.or(self.port),
            username: overrides.username.or(self.username),
            password: overrides.password.or(self.password),
            table: overrides.table.or(self.table),
            mapping,
            drop: overrides.drop.or(self.drop),
            truncate: overrides.truncate.or(self.truncate),
            auto_pk: overrides.auto_pk.or(self.auto_pk),
            default_col_type: overrides.default_col_type.or(self.default_col_type),
            table_options: overrides.table_options.or(self.table_options),
            bulk_insert_size: overrides.bulk_insert_size.or(self.bulk_insert_size),
            verbose: overrides.verbose.or(self.verbose),
            delimiter: overrides.delimiter.or(self.delimiter),
            encoding: overrides.encoding.or(self.encoding),
            notify: overrides.notify.or(self.notify),
        }
    }
}

fn sanitized_mapping(
    mapping: BTreeMap<String, ColumnMappingFile>,
) -> BTreeMap<String, ColumnMappingFile> {
    let mut sanitized: BTreeMap<String, ColumnMappingFile> = BTreeMap::new();
    for (column, column_mapping) in mapping {
        let key = sanitize_name(&column);
        let merged = match sanitized.remove(&key) {
            Some(existing) => existing.merge(column_mapping),
            None => column_mapping,
        };
        sanitized.insert(key, merged);
    }
    sanitized
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn first_existing(stem: &Path) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| stem.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

/// Locates the global configuration file of an import directory.
pub fn global_config_path(dir: &Path, explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    match explicit {
        Some(path) if path.is_file() => Ok(Some(path.to_path_buf())),
        Some(path) => bail!("Global config file {path:?} does not exist"),
        None => Ok(first_existing(&dir.join(GLOBAL_CONFIG_STEM))),
    }
}

/// Locates the configuration file that belongs to a single CSV file.
pub fn file_config_path(csv_path: &Path) -> Option<PathBuf> {
    first_existing(csv_path)
}

/// Loads and merges the global and per-file configuration for `csv_path`.
/// At least one of the two must exist.
pub fn load_for_file(csv_path: &Path, global: Option<&Path>) -> Result<ConfigFile> {
    let global_config = global.map(ConfigFile::load).transpose()?;
    let file_config = file_config_path(csv_path)
        .map(|path| ConfigFile::load(&path))
        .transpose()?;
    match (global_config, file_config) {
        (Some(base), Some(overrides)) => Ok(base.merge(overrides)),
        (Some(base), None) => Ok(base),
        (None, Some(overrides)) => Ok(overrides),
        (None, None) => bail!("No configuration files found for {csv_path:?}"),
    }
}

/// Resolved settings of one column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    pub column_type: Option<String>,
    pub index: bool,
    pub format: Option<String>,
    pub null_if: Vec<String>,
    pub null_if_empty: bool,
}

impl From<ColumnMappingFile> for ColumnMapping {
    fn from(file: ColumnMappingFile) -> Self {
        ColumnMapping {
            column_type: file
                .column_type
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            index: file.index.unwrap_or(false),
            format: file.format.filter(|f| !f.is_empty()),
            null_if: file.null_if.unwrap_or_default(),
            null_if_empty: file.null_if_empty.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub db: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
}

/// Fully resolved configuration of one file's import.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub connection: ConnectionParams,
    pub table: String,
    pub mapping: HashMap<String, ColumnMapping>,
    pub drop: bool,
    pub truncate: bool,
    pub auto_pk: bool,
    pub default_col_type: String,
    pub table_options: String,
    pub bulk_insert_size: usize,
    pub verbose: bool,
    pub delimiter: u8,
    pub encoding: &'static Encoding,
}

impl ImportConfig {
    /// Applies defaults to a merged config. The table name defaults to the
    /// sanitized file stem and mapping keys are sanitized the same way as
    /// header names.
    pub fn resolve(file_name: &str, file: ConfigFile) -> Result<Self, ImportError> {
        let db = file
            .db
            .filter(|db| !db.trim().is_empty())
            .ok_or_else(|| ImportError::Config("'db' must be set".to_string()))?;
        let bulk_insert_size = file.bulk_insert_size.unwrap_or(DEFAULT_BULK_INSERT_SIZE);
        if bulk_insert_size == 0 {
            return Err(ImportError::Config(
                "'bulkInsertSize' must be greater than zero".to_string(),
            ));
        }
        let delimiter = match file.delimiter.as_deref() {
            Some(value) => io_utils::parse_delimiter(value)
                .map_err(|err| ImportError::Config(format!("invalid delimiter: {err}")))?,
            None => io_utils::DEFAULT_DELIMITER,
        };
        let encoding = io_utils::resolve_encoding(file.encoding.as_deref())
            .map_err(|err| ImportError::Config(err.to_string()))?;

        let table = file
            .table
            .filter(|table| !table.trim().is_empty())
            .unwrap_or_else(|| sanitize_name(file_stem(file_name)));

        let mapping = sanitized_mapping(file.mapping)
            .into_iter()
            .map(|(column, mapping)| (column, ColumnMapping::from(mapping)))
            .collect();

        Ok(ImportConfig {
            connection: ConnectionParams {
                db,
                host: file.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: file.port.unwrap_or(DEFAULT_PORT),
                username: file.username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
                password: file.password,
            },
            table,
            mapping,
            drop: file.drop.unwrap_or(false),
            truncate: file.truncate.unwrap_or(false),
            auto_pk: file.auto_pk.unwrap_or(false),
            default_col_type: file
                .default_col_type
                .unwrap_or_else(|| DEFAULT_COLUMN_TYPE.to_string()),
            table_options: file
                .table_options
                .unwrap_or_else(|| DEFAULT_TABLE_OPTIONS.to_string()),
            bulk_insert_size,
            verbose: file.verbose.unwrap_or(false),
            delimiter,
            encoding,
        })
    }

    pub fn mapping_for(&self, column: &str) -> Option<&ColumnMapping> {
        self.mapping.get(column)
    }

    /// The type definition used when the table has to be created.
    pub fn column_definition(&self, column: &str) -> &str {
        self.mapping_for(column)
            .and_then(|mapping| mapping.column_type.as_deref())
            .unwrap_or(&self.default_col_type)
    }
}

fn file_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_applies_defaults() {
        let file = ConfigFile {
            db: Some("imports".to_string()),
            ..ConfigFile::default()
        };
        let config = ImportConfig::resolve("Sales Report.csv", file).unwrap();
        assert_eq!(config.table, "sales_report");
        assert_eq!(config.connection.port, DEFAULT_PORT);
        assert_eq!(config.bulk_insert_size, DEFAULT_BULK_INSERT_SIZE);
        assert_eq!(config.default_col_type, DEFAULT_COLUMN_TYPE);
        assert_eq!(config.table_options, DEFAULT_TABLE_OPTIONS);
        assert_eq!(config.delimiter, b';');
        assert!(!config.drop && !config.truncate && !config.auto_pk);
    }

    #[test]
    fn resolve_requires_database() {
        let err = ImportConfig::resolve("a.csv", ConfigFile::default()).unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }

    #[test]
    fn resolve_rejects_zero_bulk_size() {
        let file = ConfigFile {
            db: Some("imports".to_string()),
            bulk_insert_size: Some(0),
            ..ConfigFile::default()
        };
        assert!(ImportConfig::resolve("a.csv", file).is_err());
    }

    #[test]
    fn column_definition_falls_back_to_default() {
        let mut file = ConfigFile {
            db: Some("imports".to_string()),
            ..ConfigFile::default()
        };
        file.mapping.insert(
            "Amount".to_string(),
            ColumnMappingFile {
                column_type: Some("DECIMAL(12,2)".to_string()),
                ..ColumnMappingFile::default()
            },
        );
        let config = ImportConfig::resolve("a.csv", file).unwrap();
        assert_eq!(config.column_definition("amount"), "DECIMAL(12,2)");
        assert_eq!(config.column_definition("name"), DEFAULT_COLUMN_TYPE);
    }

    #[test]
    fn merge_matches_columns_by_sanitized_name() {
        let mut global = ConfigFile::default();
        global.mapping.insert(
            "Unit Price".to_string(),
            ColumnMappingFile {
                column_type: Some("DOUBLE".to_string()),
                format: Some("1.2".to_string()),
                ..ColumnMappingFile::default()
            },
        );
        let mut file = ConfigFile {
            db: Some("imports".to_string()),
            ..ConfigFile::default()
        };
        file.mapping.insert(
            "unit_price".to_string(),
            ColumnMappingFile {
                format: Some("1,2".to_string()),
                ..ColumnMappingFile::default()
            },
        );

        let merged = global.merge(file);
        assert_eq!(merged.mapping.len(), 1);
        let column = &merged.mapping["unit_price"];
        assert_eq!(column.column_type.as_deref(), Some("DOUBLE"));
        assert_eq!(column.format.as_deref(), Some("1,2"));
    }
}
