//! Error types for the exporter framework.

use std::fmt;

use thiserror::Error;

use crate::exporter::QualifiedName;

/// Result type alias using [`FrameworkError`].
pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Entry point a plugin unit is expected to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginSymbol {
    /// The collection capability (exporter constructor).
    Capability,
    /// The configuration schema.
    Config,
}

impl fmt::Display for PluginSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capability => f.write_str("capability"),
            Self::Config => f.write_str("config"),
        }
    }
}

/// Errors that can occur while loading, bootstrapping or running exporters.
#[derive(Error, Debug)]
pub enum FrameworkError {
    /// Configuration file could not be read or parsed.
    #[error(transparent)]
    Config(#[from] metronome_common::Error),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Plugin unit or one of its entry points is missing.
    #[error("Failed to load {missing} of exporter type '{exporter_type}'")]
    PluginLoad {
        exporter_type: String,
        missing: PluginSymbol,
    },

    /// Raw exporter config does not satisfy the type's schema.
    #[error("Invalid config of exporter '{exporter}' (type '{exporter_type}'): {detail}")]
    PluginConfigValidation {
        exporter_type: String,
        exporter: QualifiedName,
        detail: String,
    },

    /// An exporter's collection call failed or panicked.
    #[error("Exporter '{exporter}' raised an error: {message}")]
    Collection { exporter: String, message: String },

    /// Metrics listener error.
    #[error("Metrics listener error: {0}")]
    Listener(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameworkError {
    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a plugin load error.
    pub fn plugin_load(exporter_type: impl Into<String>, missing: PluginSymbol) -> Self {
        Self::PluginLoad {
            exporter_type: exporter_type.into(),
            missing,
        }
    }

    /// Create a collection error for the named exporter.
    pub fn collection(exporter: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Collection {
            exporter: exporter.to_string(),
            message: message.into(),
        }
    }
}
