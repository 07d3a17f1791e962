//! Simulated slow exporter, useful to compare execution modes.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use metronome_exposition::{CounterFamily, Labels, exporter_labels};
use metronome_framework::{
    BlockingExporter, Exporter, ExporterConfig, ExporterContext, PluginModule,
};

pub const EXPORTER_TYPE: &str = "sleep";

#[derive(Debug, Clone, Deserialize)]
pub struct SleepConfig {
    /// Time each collection blocks for.
    pub seconds: f64,
}

impl ExporterConfig for SleepConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.seconds.is_finite() || self.seconds < 0.0 {
            return Err(format!("seconds must be >= 0, got {}", self.seconds));
        }
        self.duration().map(|_| ())
    }
}

impl SleepConfig {
    fn duration(&self) -> Result<Duration, String> {
        Duration::try_from_secs_f64(self.seconds)
            .map_err(|e| format!("invalid seconds {}: {}", self.seconds, e))
    }
}

pub fn plugin() -> PluginModule {
    PluginModule::new()
        .with_config::<SleepConfig>()
        .with_capability(|ctx| Ok(Exporter::blocking(SleepExporter::new(&ctx)?)))
}

pub struct SleepExporter {
    duration: Duration,
    exports: CounterFamily,
    labels: Labels,
}

impl SleepExporter {
    pub fn new(ctx: &ExporterContext) -> anyhow::Result<Self> {
        let config = ctx.require_config::<SleepConfig>()?;
        Ok(Self {
            duration: config.duration().map_err(anyhow::Error::msg)?,
            exports: ctx
                .metrics()
                .counter_family("sleep_exports", "Completed simulated exports"),
            labels: exporter_labels(ctx.qualified_name().as_str()),
        })
    }
}

impl BlockingExporter for SleepExporter {
    fn export_metrics(&self) -> anyhow::Result<()> {
        info!("Exporting metrics (sleeping {:?})", self.duration);
        std::thread::sleep(self.duration);
        self.exports.get_or_create(&self.labels).inc();
        info!("Exported metrics");
        Ok(())
    }
}
