use thiserror::Error;

/// Common error type for Metronome components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported format of config file: '{path}'")]
    ConfigFormat { path: String },

    #[error("Path to config file does not exist: '{path}'")]
    ConfigNotFound { path: String },

    #[error("Failed to parse config file '{path}': {message}")]
    ConfigParse { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using Metronome's Error.
pub type Result<T> = std::result::Result<T, Error>;
