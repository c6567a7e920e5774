//! Literal escaping and identifier sanitizing for generated SQL.
//!
//! Identifiers cannot be bound as statement parameters, so every table name,
//! column name and literal goes through [`escape_string`] exactly once before
//! it is embedded in a statement. Escaping is not idempotent.

use std::collections::HashSet;

/// Backslash-escapes a string the way MySQL expects inside quotes.
pub fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\x1a' => escaped.push_str("\\Z"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Wraps an already escaped identifier in backticks, doubling any backtick
/// inside it.
pub fn quote_identifier(escaped: &str) -> String {
    format!("`{}`", escaped.replace('`', "``"))
}

/// Lowercases a header and replaces every non alphanumeric character with `_`.
pub fn sanitize_name(name: &str) -> String {
    let sanitized = name
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect::<String>()
        .to_ascii_lowercase();
    if sanitized.is_empty() {
        "column".to_string()
    } else {
        sanitized
    }
}

/// Sanitizes a header row. Names that collide after sanitizing get a numeric
/// suffix, starting at `_2`, in header order.
pub fn sanitize_names(names: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::with_capacity(names.len());
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let base = sanitize_name(name);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while used.contains(&candidate) {
            suffix += 1;
            candidate = format!("{base}_{suffix}");
        }
        used.insert(candidate.clone());
        result.push(candidate);
    }
    result
}
