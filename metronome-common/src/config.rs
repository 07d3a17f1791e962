use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Config file syntax, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// `.yml` / `.yaml`
    Yaml,
    /// `.json` / `.json5` (JSON is a subset of JSON5).
    Json5,
}

impl FileFormat {
    /// Detect the format from a path's extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => Ok(Self::Yaml),
            Some("json") | Some("json5") => Ok(Self::Json5),
            _ => Err(Error::ConfigFormat {
                path: path.display().to_string(),
            }),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Load a configuration file, choosing the parser from the file extension.
///
/// The extension is checked before the file is opened, so an unsupported
/// extension is reported even when the file does not exist.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let format = FileFormat::from_path(path)?;

    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::ConfigNotFound {
            path: path.display().to_string(),
        },
        _ => Error::Io(e),
    })?;

    parse_config(&content, format).map_err(|e| match e {
        Error::Config(message) => Error::ConfigParse {
            path: path.display().to_string(),
            message,
        },
        other => other,
    })
}

/// Parse a configuration document from a string.
pub fn parse_config<T: DeserializeOwned>(content: &str, format: FileFormat) -> Result<T> {
    match format {
        FileFormat::Yaml => serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string())),
        FileFormat::Json5 => json5::from_str(content).map_err(|e| Error::Config(e.to_string())),
    }
}
