// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File configuration provider (JSON, TOML or YAML).

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::ConfigError;
use super::ConfigProvider;

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// `.json`
    Json,
    /// `.toml`
    Toml,
    /// `.yaml`, `.yml`
    Yaml,
}

impl FileFormat {
    /// Detect the format from the file extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension().and_then(|ext| {
            match ext.to_string_lossy().to_lowercase().as_str() {
                "json" => Some(FileFormat::Json),
                "toml" => Some(FileFormat::Toml),
                "yaml" | "yml" => Some(FileFormat::Yaml),
                _ => None,
            }
        })
    }
}

/// Provider serving values from one configuration file.
///
/// The file is read once at construction; keys are dot-separated paths into
/// the document (`apitoolkit.logging.level`).
#[derive(Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
    format: FileFormat,
    data: Map<String, Value>,
}

impl FileConfigProvider {
    /// Load `path`, detecting the format from its extension.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let path_buf = PathBuf::from(path);
        let format = FileFormat::from_extension(&path_buf)
            .ok_or_else(|| ConfigError::provider_error("file", format!("unsupported file format: {path}")))?;

        let content = fs::read_to_string(&path_buf).map_err(|e| {
            ConfigError::provider_error("file", format!("failed to read {path}: {e}"))
        })?;
        let data = Self::parse(&content, format)?;

        Ok(Self {
            path: path_buf,
            format,
            data,
        })
    }

    /// Parse an in-memory document.
    pub fn from_content(content: &str, format: FileFormat) -> Result<Self, ConfigError> {
        Ok(Self {
            path: PathBuf::new(),
            format,
            data: Self::parse(content, format)?,
        })
    }

    /// Source file path; empty for in-memory documents.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detected format.
    pub fn format(&self) -> FileFormat {
        self.format
    }

    fn parse(content: &str, format: FileFormat) -> Result<Map<String, Value>, ConfigError> {
        // Every format is converted to serde_json::Value for uniform lookup
        let value = match format {
            FileFormat::Json => serde_json::from_str::<Value>(content)
                .map_err(|e| ConfigError::provider_error("file", format!("invalid JSON: {e}")))?,
            FileFormat::Toml => {
                let toml_value: toml::Value = toml::from_str(content).map_err(|e| {
                    ConfigError::provider_error("file", format!("invalid TOML: {e}"))
                })?;
                serde_json::to_value(toml_value).map_err(|e| {
                    ConfigError::provider_error("file", format!("failed to convert TOML: {e}"))
                })?
            }
            FileFormat::Yaml => {
                let yaml_value: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
                    ConfigError::provider_error("file", format!("invalid YAML: {e}"))
                })?;
                serde_json::to_value(yaml_value).map_err(|e| {
                    ConfigError::provider_error("file", format!("failed to convert YAML: {e}"))
                })?
            }
        };

        match value {
            Value::Object(map) => Ok(map),
            _ => Err(ConfigError::provider_error(
                "file",
                "root configuration must be an object",
            )),
        }
    }

    fn get_nested_value(&self, key_path: &str) -> Option<&Value> {
        let mut parts = key_path.split('.');
        let mut current = self.data.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }
}

impl ConfigProvider for FileConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.get_nested_value(key).is_some()
    }

    fn provider_name(&self) -> &str {
        "file"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.get_nested_value(key).cloned())
    }
}
