//! Configuration loading, layering and validation.

mod client;
mod types;
mod validation;

pub use client::{parse_size, ClientConfig};
pub use types::*;

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use crate::error::{LoadError, Result};

/// Settings layers in precedence order, lowest first.
pub const DEFAULT_LAYERS: &[&str] = &[
    "default_settings.yaml",
    "settings.yaml",
    "test/default_settings.yaml",
    "test/settings.yaml",
];

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and merge several YAML layers, later layers overriding earlier ones.
    ///
    /// Missing files are skipped. Mappings merge key by key; any other value
    /// (sequences included) is replaced wholesale. The merged document is
    /// deserialized and validated once.
    pub fn load_layers<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut merged: Option<Value> = None;
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                debug!("Settings layer {} not found, skipping", path.display());
                continue;
            }
            debug!("Loading settings layer {}", path.display());
            let content = std::fs::read_to_string(path)?;
            let layer: Value = serde_yaml::from_str(&content)?;
            merged = Some(match merged {
                Some(base) => merge_values(base, layer),
                None => layer,
            });
        }

        let merged = merged.ok_or_else(|| {
            LoadError::Config("no settings file found in any layer".to_string())
        })?;
        let config: Config = serde_yaml::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    /// The fixed layer paths under `dir`.
    pub fn default_layers<P: AsRef<Path>>(dir: P) -> Vec<PathBuf> {
        DEFAULT_LAYERS.iter().map(|l| dir.as_ref().join(l)).collect()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => {
                        let current = std::mem::replace(existing, Value::Null);
                        *existing = merge_values(current, value);
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}
