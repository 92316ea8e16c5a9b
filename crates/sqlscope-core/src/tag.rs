//! Per-field settings declared as a tag string.
//!
//! A tag is a `;`-separated list of `KEY:value` pairs or bare `KEY` flags:
//!
//! ```ignore
//! FieldDef::column("email", SqlType::Text).tag("column:email_address;size:120;unique")
//! ```
//!
//! Keys are case-insensitive and stored upper-cased. A bare flag maps to
//! itself, so `has("UNIQUE")` and `get("UNIQUE") == Some("UNIQUE")` both hold.

use std::collections::BTreeMap;

/// Parsed tag settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSettings {
    entries: BTreeMap<String, String>,
}

impl TagSettings {
    /// Parse a raw tag string. Empty segments are skipped.
    pub fn parse(tag: &str) -> Self {
        let mut entries = BTreeMap::new();
        for segment in tag.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let mut parts = segment.splitn(2, ':');
            let key = parts.next().unwrap_or_default().trim().to_uppercase();
            let value = match parts.next() {
                Some(v) => v.trim().to_string(),
                None => key.clone(),
            };
            entries.insert(key, value);
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Comma-separated list value (`foreignkey:a,b`).
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Boolean switch; absent means `None`, `false` (any case) means `Some(false)`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| !v.eq_ignore_ascii_case("false"))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }
}
