//! Application settings and exporter descriptors.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use metronome_common::{LoggingConfig, load_config};

use crate::error::{FrameworkError, Result};
use crate::exporter::QualifiedName;

/// Concurrency strategy used to drive exporters, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// One exporter at a time, in bootstrap order.
    #[serde(alias = "sync")]
    Sequential,
    /// All exporters of a round at once, joined before sleeping.
    #[serde(alias = "async")]
    Concurrent,
    /// One dedicated worker per exporter, each with its own cadence.
    #[serde(alias = "multithreaded")]
    PerExporterThread,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Concurrent => "concurrent",
            Self::PerExporterThread => "per-exporter-thread",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level settings (`app` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port of the metrics exposition listener.
    #[serde(alias = "prometheus_port")]
    pub metrics_port: u16,

    /// Concurrency strategy.
    pub execution_mode: ExecutionMode,

    /// Pause between rounds (seconds).
    pub export_interval_seconds: u64,

    /// Upper bound of the blocking worker pool (default: 8).
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,
}

fn default_max_blocking_threads() -> usize {
    8
}

impl AppConfig {
    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_seconds)
    }

    /// Validate the application settings.
    pub fn validate(&self) -> Result<()> {
        if self.export_interval_seconds == 0 {
            return Err(FrameworkError::validation(
                "export_interval_seconds must be > 0",
            ));
        }

        if self.max_blocking_threads == 0 {
            return Err(FrameworkError::validation(
                "max_blocking_threads must be > 0",
            ));
        }

        Ok(())
    }
}

/// Declarative description of one exporter to construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExporterSettings {
    /// Plugin type identifier.
    #[serde(rename = "type")]
    pub exporter_type: String,

    /// Optional instance name.
    #[serde(default)]
    pub name: Option<String>,

    /// Disabled exporters are skipped during bootstrap.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Raw, type-specific configuration.
    #[serde(default)]
    pub config: Option<Map<String, Value>>,

    /// Interval override used by the per-exporter strategy (seconds).
    #[serde(default)]
    pub interval_seconds: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl ExporterSettings {
    /// Create an enabled descriptor without name or config.
    pub fn new(exporter_type: impl Into<String>) -> Self {
        Self {
            exporter_type: exporter_type.into(),
            name: None,
            enabled: true,
            config: None,
            interval_seconds: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a raw config; non-object values are ignored.
    pub fn with_config(mut self, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config = Some(map);
        }
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(&self.exporter_type, self.name.as_deref())
    }

    /// The raw config, if present and non-empty.
    pub fn raw_config(&self) -> Option<&Map<String, Value>> {
        self.config.as_ref().filter(|c| !c.is_empty())
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_seconds.map(Duration::from_secs)
    }

    /// Validate the descriptor's own fields (not its plugin config).
    pub fn validate(&self) -> Result<()> {
        if self.exporter_type.trim().is_empty() {
            return Err(FrameworkError::validation("exporter type must not be empty"));
        }

        if self.interval_seconds == Some(0) {
            return Err(FrameworkError::validation(format!(
                "interval_seconds of exporter '{}' must be > 0",
                self.qualified_name()
            )));
        }

        Ok(())
    }
}

/// Complete configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetronomeConfig {
    /// Application settings.
    pub app: AppConfig,

    /// Ordered exporter descriptors.
    #[serde(default)]
    pub exporters: Vec<ExporterSettings>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MetronomeConfig {
    /// Load configuration from a YAML, JSON or JSON5 file.
    ///
    /// Calls [`validate`](Self::validate) after loading.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Enabled exporters must have distinct qualified names, since the name
    /// labels their metric series.
    pub fn validate(&self) -> Result<()> {
        self.app.validate()?;
        let mut seen = HashSet::new();
        for exporter in &self.exporters {
            exporter.validate()?;
            if exporter.enabled && !seen.insert(exporter.qualified_name()) {
                return Err(FrameworkError::validation(format!(
                    "duplicate exporter '{}', set a distinct name",
                    exporter.qualified_name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metronome_common::{FileFormat, LogFormat, parse_config};
    use serde_json::json;

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
app:
  metrics_port: 9100
  execution_mode: concurrent
  export_interval_seconds: 15
exporters:
  - type: file_size
    name: logs
    config:
      patterns: ["/var/log/*.log"]
  - type: system
    enabled: false
  - type: tcp_probe
    interval_seconds: 5
logging:
  level: debug
  format: json
"#;

        let config: MetronomeConfig = parse_config(yaml, FileFormat::Yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.app.metrics_port, 9100);
        assert_eq!(config.app.execution_mode, ExecutionMode::Concurrent);
        assert_eq!(config.app.export_interval(), Duration::from_secs(15));
        assert_eq!(config.app.max_blocking_threads, 8);

        assert_eq!(config.exporters.len(), 3);
        assert_eq!(config.exporters[0].qualified_name().as_str(), "file_size.logs");
        assert_eq!(
            config.exporters[0].raw_config().unwrap().get("patterns"),
            Some(&json!(["/var/log/*.log"]))
        );
        assert!(!config.exporters[1].enabled);
        assert!(config.exporters[2].enabled);
        assert_eq!(config.exporters[2].interval(), Some(Duration::from_secs(5)));

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_execution_mode_names() {
        for (raw, mode) in [
            ("\"sequential\"", ExecutionMode::Sequential),
            ("\"concurrent\"", ExecutionMode::Concurrent),
            ("\"per-exporter-thread\"", ExecutionMode::PerExporterThread),
            ("\"sync\"", ExecutionMode::Sequential),
            ("\"async\"", ExecutionMode::Concurrent),
            ("\"multithreaded\"", ExecutionMode::PerExporterThread),
        ] {
            let parsed: ExecutionMode = serde_json::from_str(raw).unwrap();
            assert_eq!(parsed, mode);
        }

        assert!(serde_json::from_str::<ExecutionMode>("\"parallel\"").is_err());
        assert_eq!(ExecutionMode::PerExporterThread.to_string(), "per-exporter-thread");
    }

    #[test]
    fn test_prometheus_port_alias() {
        let json = r#"{
            app: { prometheus_port: 8000, execution_mode: "sync", export_interval_seconds: 1 },
        }"#;
        let config: MetronomeConfig = parse_config(json, FileFormat::Json5).unwrap();
        assert_eq!(config.app.metrics_port, 8000);
        assert!(config.exporters.is_empty());
    }

    #[test]
    fn test_validate_zero_interval() {
        let json = r#"{
            app: { metrics_port: 8000, execution_mode: "sequential", export_interval_seconds: 0 },
        }"#;
        let config: MetronomeConfig = parse_config(json, FileFormat::Json5).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("export_interval_seconds must be > 0"));
    }

    #[test]
    fn test_validate_exporter_fields() {
        assert!(ExporterSettings::new(" ").validate().is_err());

        let mut settings = ExporterSettings::new("system").with_name("local");
        settings.interval_seconds = Some(0);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("'system.local'"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let json = r#"{
            app: { metrics_port: 8000, execution_mode: "concurrent", export_interval_seconds: 5 },
            exporters: [
                { type: "file_size", name: "logs" },
                { type: "file_size", name: "logs", enabled: false },
                { type: "file_size" },
            ],
        }"#;
        let mut config: MetronomeConfig = parse_config(json, FileFormat::Json5).unwrap();
        config.validate().unwrap();

        config.exporters[1].enabled = true;
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains("duplicate exporter 'file_size.logs'"),
            "{}",
            err
        );

        // An unnamed exporter is qualified by its type alone.
        config.exporters[1] = ExporterSettings::new("file_size");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_config_is_treated_as_absent() {
        let settings = ExporterSettings::new("system").with_config(json!({}));
        assert!(settings.config.is_some());
        assert!(settings.raw_config().is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let result = MetronomeConfig::load("/nonexistent/path.yml");
        assert!(matches!(
            result,
            Err(FrameworkError::Config(metronome_common::Error::ConfigNotFound { .. }))
        ));
    }

    #[test]
    fn test_load_unsupported_extension() {
        let result = MetronomeConfig::load("/nonexistent/path.toml");
        assert!(matches!(
            result,
            Err(FrameworkError::Config(metronome_common::Error::ConfigFormat { .. }))
        ));
    }
}
