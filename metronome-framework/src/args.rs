//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

use metronome_common::LoggingConfig;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yml";

/// Command line arguments of the exporter runner.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "Run metric exporters on a schedule and expose them to Prometheus")]
pub struct RunnerArgs {
    /// Path to configuration file (YAML, JSON or JSON5).
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Bootstrap exporters and run the schedule without collecting or
    /// starting the metrics listener.
    #[arg(long)]
    pub dry_run: bool,

    /// Shortcut for `--log-level debug`.
    #[arg(short, long)]
    pub verbose: bool,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl RunnerArgs {
    /// Parse CLI arguments of the current process.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Apply the CLI overrides to the configured logging settings.
    ///
    /// `--verbose` wins over `--log-level`.
    pub fn logging(&self, configured: &LoggingConfig) -> LoggingConfig {
        let mut logging = configured.clone();
        if self.verbose {
            logging.level = "debug".to_string();
        } else if let Some(level) = &self.log_level {
            logging.level = level.clone();
        }
        logging
    }
}
