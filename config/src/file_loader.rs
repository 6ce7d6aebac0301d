//! # Configuration File Loading
//!
//! Loads `IndexerConfig` from TOML or YAML files, detecting the format from
//! the file extension.

use crate::error::{ConfigError, ConfigResult};
use crate::settings::IndexerConfig;
use std::path::Path;

pub fn load_from_toml(path: &Path) -> ConfigResult<IndexerConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigError::FileNotFound(path.display().to_string()))?;

    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(e.to_string()))
}

pub fn load_from_yaml(path: &Path) -> ConfigResult<IndexerConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigError::FileNotFound(path.display().to_string()))?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigError::YamlParse(e.to_string()))
}

/// Load configuration from file with auto-detection.
///
/// ## Supported Formats
/// - `.toml`: TOML format
/// - `.yaml` / `.yml`: YAML format
pub fn load_from_file(path: &Path) -> ConfigResult<IndexerConfig> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or(ConfigError::NoExtension)?;

    match extension.to_lowercase().as_str() {
        "toml" => load_from_toml(path),
        "yaml" | "yml" => load_from_yaml(path),
        other => Err(ConfigError::UnsupportedFormat(other.to_string()))
    }
}
