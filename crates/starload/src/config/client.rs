//! MySQL client option file (`my.cnf`) holding the client packet limit.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{LoadError, Result};

/// Sections whose keys apply to this client. Later sections win.
const CLIENT_SECTIONS: &[&str] = &["", "client", "mysql"];

/// Key/value view of a MySQL option file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    values: HashMap<String, String>,
}

impl ClientConfig {
    /// Read an option file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoadError::Config(format!(
                "cannot read client config {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse option file text.
    ///
    /// Keys outside the client sections are ignored. Dashes and underscores
    /// in keys are interchangeable, as in MySQL itself.
    pub fn parse(text: &str) -> Self {
        let mut per_section: Vec<(usize, String, String)> = Vec::new();
        let mut section: Option<usize> = CLIENT_SECTIONS.iter().position(|s| s.is_empty());

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_ascii_lowercase();
                section = CLIENT_SECTIONS.iter().position(|s| *s == name);
                continue;
            }
            let Some(idx) = section else { continue };
            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (line, ""),
            };
            let key = key.to_ascii_lowercase().replace('-', "_");
            let value = value.trim_matches(|c| c == '"' || c == '\'').to_string();
            per_section.push((idx, key, value));
        }

        // Stable sort keeps file order within a section.
        per_section.sort_by_key(|(idx, _, _)| *idx);
        let values = per_section.into_iter().map(|(_, k, v)| (k, v)).collect();
        Self { values }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Client packet ceiling in bytes.
    pub fn max_allowed_packet(&self) -> Result<u64> {
        let raw = self.get("max_allowed_packet").ok_or_else(|| {
            LoadError::Config("max_allowed_packet is not set in client config".to_string())
        })?;
        parse_size(raw)
    }
}

/// Parse a size string with an optional K/M/G suffix (base 1000, case-insensitive).
///
/// ```
/// use starload::config::parse_size;
/// assert_eq!(parse_size("16M").unwrap(), 16_000_000);
/// assert_eq!(parse_size("512").unwrap(), 512);
/// ```
pub fn parse_size(raw: &str) -> Result<u64> {
    let s = raw.trim();
    let (digits, multiplier) = match s.chars().last() {
        Some('k' | 'K') => (&s[..s.len() - 1], 1_000),
        Some('m' | 'M') => (&s[..s.len() - 1], 1_000_000),
        Some('g' | 'G') => (&s[..s.len() - 1], 1_000_000_000),
        _ => (s, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| LoadError::Config(format!("invalid size '{}'", raw)))
}
