//! Per-cell value coercion.
//!
//! A raw cell is turned into the text that will be quoted into the insert
//! statement, or into `None` for SQL `NULL`. Null rules run first, then the
//! column's format hint (if any) is applied according to the column's
//! [`SemanticColumnType`]. Translated date layouts and float formats are
//! memoized per format string inside the [`Coercer`], so a session pays the
//! translation once per column rather than once per row.

use std::{collections::HashMap, fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    config::ColumnMapping,
    date_layout::DateLayout,
    error::{ImportError, Result},
};

/// How a column's values are treated, derived from its SQL type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SemanticColumnType {
    String,
    Int,
    Float,
    Date,
    DateTime,
}

struct TypePatterns {
    int: Regex,
    float: Regex,
    date_time: Regex,
    date: Regex,
}

fn type_patterns() -> &'static TypePatterns {
    static PATTERNS: OnceLock<TypePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| TypePatterns {
        int: Regex::new("(?i)int|unsigned|bit|tinyint|smallint|mediumint").expect("int pattern"),
        float: Regex::new("(?i)float|double|decimal|numeric|real").expect("float pattern"),
        date_time: Regex::new("(?i)datetime|timestamp").expect("datetime pattern"),
        date: Regex::new("(?i)date").expect("date pattern"),
    })
}

impl SemanticColumnType {
    /// Classifies a column definition such as `INT(11) NOT NULL` or
    /// `VARCHAR(255) NULL DEFAULT NULL`. Checks run int, float, datetime,
    /// date in that order; anything else is a string.
    pub fn from_definition(definition: &str) -> Self {
        let patterns = type_patterns();
        if patterns.int.is_match(definition) {
            SemanticColumnType::Int
        } else if patterns.float.is_match(definition) {
            SemanticColumnType::Float
        } else if patterns.date_time.is_match(definition) {
            SemanticColumnType::DateTime
        } else if patterns.date.is_match(definition) {
            SemanticColumnType::Date
        } else {
            SemanticColumnType::String
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticColumnType::String => "string",
            SemanticColumnType::Int => "int",
            SemanticColumnType::Float => "float",
            SemanticColumnType::Date => "date",
            SemanticColumnType::DateTime => "dateTime",
        }
    }
}

impl fmt::Display for SemanticColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric format derived from a sample literal such as `1.2` or `1,2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatFormat {
    decimal_separator: Option<char>,
}

impl FloatFormat {
    /// The last non-digit character of the sample is the decimal separator.
    pub fn from_sample(sample: &str) -> Self {
        FloatFormat {
            decimal_separator: sample.chars().rev().find(|c| !c.is_ascii_digit()),
        }
    }

    pub fn decimal_separator(&self) -> Option<char> {
        self.decimal_separator
    }

    /// Drops every other non-digit character and rewrites the decimal
    /// separator to `.`; a leading sign is kept. Returns `None` when the
    /// result is not a number. Samples without a separator leave values
    /// untouched.
    pub fn normalize(&self, value: &str) -> Option<String> {
        let Some(separator) = self.decimal_separator else {
            return Some(value.to_string());
        };
        let trimmed = value.trim();
        let mut normalized = String::with_capacity(trimmed.len());
        for (idx, ch) in trimmed.chars().enumerate() {
            if ch.is_ascii_digit() {
                normalized.push(ch);
            } else if idx == 0 && (ch == '-' || ch == '+') {
                normalized.push(ch);
            } else if ch == separator {
                normalized.push('.');
            }
        }
        normalized.parse::<f64>().ok().map(|_| normalized)
    }
}

/// Float formats keyed by the format string they were derived from.
#[derive(Debug, Default)]
pub struct FloatFormatCache {
    formats: HashMap<String, FloatFormat>,
}

impl FloatFormatCache {
    pub fn get(&mut self, sample: &str) -> FloatFormat {
        if let Some(format) = self.formats.get(sample) {
            return *format;
        }
        let format = FloatFormat::from_sample(sample);
        self.formats.insert(sample.to_string(), format);
        format
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

/// Returns true when `value` is listed in `null_if` (exact match).
pub fn apply_null(null_if: &[String], value: &str) -> bool {
    null_if.iter().any(|candidate| candidate == value)
}

#[derive(Debug, Default)]
pub struct Coercer {
    floats: FloatFormatCache,
    layouts: HashMap<String, DateLayout>,
}

impl Coercer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coerces one cell of `column`. `None` stands for SQL `NULL`.
    pub fn coerce(
        &mut self,
        column: &str,
        mapping: &ColumnMapping,
        semantic: SemanticColumnType,
        raw: &str,
    ) -> Result<Option<String>> {
        if mapping.null_if_empty && raw.is_empty() {
            return Ok(None);
        }
        if apply_null(&mapping.null_if, raw) {
            return Ok(None);
        }
        match mapping.format.as_deref() {
            Some(format) if !format.is_empty() => self
                .apply_format(column, semantic, format, raw)
                .map(Some),
            _ => Ok(Some(raw.to_string())),
        }
    }

    /// Applies a format hint to a non-null value.
    pub fn apply_format(
        &mut self,
        column: &str,
        semantic: SemanticColumnType,
        format: &str,
        raw: &str,
    ) -> Result<String> {
        let format_error = || ImportError::Format {
            column: column.to_string(),
            value: raw.to_string(),
            layout: format.to_string(),
        };
        match semantic {
            SemanticColumnType::Date => self
                .layout(format)
                .parse_date(raw)
                .map(|date| date.format("%Y-%m-%d").to_string())
                .ok_or_else(format_error),
            SemanticColumnType::DateTime => self
                .layout(format)
                .parse_datetime(raw)
                .map(|stamp| stamp.format("%Y-%m-%d %H:%M:%S").to_string())
                .ok_or_else(format_error),
            SemanticColumnType::Float => self
                .floats
                .get(format)
                .normalize(raw)
                .ok_or_else(format_error),
            SemanticColumnType::Int | SemanticColumnType::String => Ok(raw.to_string()),
        }
    }

    fn layout(&mut self, format: &str) -> &DateLayout {
        if !self.layouts.contains_key(format) {
            self.layouts
                .insert(format.to_string(), DateLayout::parse(format));
        }
        &self.layouts[format]
    }

    pub fn float_formats(&self) -> &FloatFormatCache {
        &self.floats
    }
}
