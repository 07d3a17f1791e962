//! Metronome Exporter Framework
//!
//! Plugin bootstrapping and scheduled execution of metric exporters.
//!
//! # Overview
//!
//! - [`PluginRegistry`] maps an exporter type to its plugin unit, loading each
//!   type at most once
//! - [`ExporterBootstrapper`] turns [`ExporterSettings`] descriptors into
//!   runnable [`ExporterInstance`]s with validated configs
//! - [`Scheduler`] drives the instances forever in one [`ExecutionMode`]
//! - [`Runner`] wires bootstrap, the metrics listener and the scheduler
//!   together and handles shutdown
//!
//! # Example
//!
//! ```ignore
//! use metronome_framework::{Exporter, ExporterConfig, PluginModule, RunnerArgs, run_app};
//!
//! #[derive(serde::Deserialize)]
//! struct QueueConfig {
//!     url: String,
//! }
//!
//! impl ExporterConfig for QueueConfig {}
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app(RunnerArgs::parse(), |plugins| {
//!         plugins.register("queue_depth", || {
//!             PluginModule::new()
//!                 .with_config::<QueueConfig>()
//!                 .with_capability(|ctx| Ok(Exporter::blocking(QueueDepth::new(ctx)?)))
//!         });
//!     })
//! }
//! ```

mod args;
mod bootstrap;
mod config;
mod error;
mod exporter;
mod registry;
mod runner;
mod scheduler;

pub use args::{DEFAULT_CONFIG_PATH, RunnerArgs};
pub use bootstrap::ExporterBootstrapper;
pub use config::{AppConfig, ExecutionMode, ExporterSettings, MetronomeConfig};
pub use error::{FrameworkError, PluginSymbol, Result};
pub use exporter::{
    AsyncExporter, BlockingExporter, EXPORTERS_LOG_TARGET, Exporter, ExporterConfig,
    ExporterContext, ExporterInstance, QualifiedName, ValidatedConfig,
};
pub use registry::{ConfigSchema, ExporterFactory, PluginLoader, PluginModule, PluginRegistry};
pub use runner::{Runner, build_runtime, run_app};
pub use scheduler::{RoundReport, Scheduler, SchedulerSettings};

// Re-export commonly used types from the sibling crates
pub use metronome_common::{LogFormat, LoggingConfig};
pub use metronome_exposition::{MetricsRegistry, SharedRegistry, exporter_labels};

/// Re-exported so plugins can implement [`AsyncExporter`] without a direct dependency.
pub use async_trait::async_trait;
