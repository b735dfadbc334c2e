//! Parser for `.cfg` config files
//!
//! Format:
//! - `key = value`, `key: value`, or a bare `key` (boolean flag set to true)
//! - full-line comments starting with `#` or `;`, blank lines ignored
//! - `[section]` headers are accepted and ignored
//! - lists written as `[a, b, c]`
//! - values wrapped in matching quotes are unquoted
//!
//! Inline comments are not supported: `#` inside a value is kept verbatim.

use crate::error::{ConfigError, ConfigResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_.-]*)\s*(?:[=:]\s*(.*))?$").expect("valid entry regex")
});
static SECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[[^\[\]]*\]$").expect("valid section regex"));

/// A value as written in the file, before type coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// Bare key with no value
    Flag,
    Scalar(String),
    List(Vec<String>),
}

/// One `key = value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Normalized key (`-` replaced by `_`)
    pub key: String,
    pub value: RawValue,
    /// 1-based line number
    pub line: usize,
}

/// Parse the content of a config file into raw entries, in file order.
pub fn parse_cfg(content: &str, path: &Path) -> ConfigResult<Vec<RawEntry>> {
    let mut entries = Vec::new();
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if SECTION_RE.is_match(line) {
            continue;
        }

        let Some(caps) = ENTRY_RE.captures(line) else {
            return Err(ConfigError::parse(
                path,
                line_no,
                format!("expected 'key = value', found '{}'", line),
            ));
        };

        let key = caps[1].replace('-', "_");
        let value = match caps.get(2) {
            None => RawValue::Flag,
            Some(m) => parse_value(m.as_str().trim(), path, line_no)?,
        };

        entries.push(RawEntry { key, value, line: line_no });
    }

    Ok(entries)
}

fn parse_value(value: &str, path: &Path, line: usize) -> ConfigResult<RawValue> {
    if let Some(inner) = value.strip_prefix('[') {
        let Some(inner) = inner.strip_suffix(']') else {
            return Err(ConfigError::parse(path, line, "unterminated list, missing ']'"));
        };
        let mut items = Vec::new();
        for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            items.push(unquote(part, path, line)?);
        }
        return Ok(RawValue::List(items));
    }

    Ok(RawValue::Scalar(unquote(value, path, line)?))
}

fn unquote(value: &str, path: &Path, line: usize) -> ConfigResult<String> {
    for quote in ['"', '\''] {
        if value.starts_with(quote) {
            if value.len() >= 2 && value.ends_with(quote) {
                return Ok(value[1..value.len() - 1].to_string());
            }
            return Err(ConfigError::parse(path, line, "unterminated quoted value"));
        }
    }
    Ok(value.to_string())
}

/// Interpret a scalar as a boolean (`true/false`, `yes/no`, `on/off`, `1/0`).
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
