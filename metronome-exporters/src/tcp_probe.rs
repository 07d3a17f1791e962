//! TCP reachability probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::debug;

use metronome_exposition::{GaugeFamily, Labels, exporter_labels};
use metronome_framework::{
    AsyncExporter, Exporter, ExporterConfig, ExporterContext, PluginModule,
};

pub const EXPORTER_TYPE: &str = "tcp_probe";

/// `tcp_probe` exporter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TcpProbeConfig {
    /// `host:port` to connect to.
    pub address: String,

    /// Connect timeout in milliseconds (default: 1000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    1000
}

impl TcpProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ExporterConfig for TcpProbeConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.address.contains(':') {
            return Err(format!("address '{}' must be host:port", self.address));
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

pub fn plugin() -> PluginModule {
    PluginModule::new()
        .with_config::<TcpProbeConfig>()
        .with_capability(|ctx| Ok(Exporter::cooperative(TcpProbeExporter::new(&ctx)?)))
}

pub struct TcpProbeExporter {
    config: TcpProbeConfig,
    up: GaugeFamily,
    duration: GaugeFamily,
    labels: Labels,
}

impl TcpProbeExporter {
    pub fn new(ctx: &ExporterContext) -> anyhow::Result<Self> {
        let metrics = ctx.metrics();
        Ok(Self {
            config: ctx.require_config::<TcpProbeConfig>()?.clone(),
            up: metrics.gauge_family("tcp_probe_up", "Whether the last connect succeeded"),
            duration: metrics.gauge_family(
                "tcp_probe_duration_seconds",
                "Duration of the last connect attempt",
            ),
            labels: exporter_labels(ctx.qualified_name().as_str()),
        })
    }
}

#[async_trait]
impl AsyncExporter for TcpProbeExporter {
    /// An unreachable target is a measurement (`tcp_probe_up 0`), not an error.
    async fn export_metrics(&self) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.timeout(),
            TcpStream::connect(&self.config.address),
        )
        .await;
        let elapsed = started.elapsed();

        let up = match result {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(address = %self.config.address, error = %e, "Connect failed");
                false
            }
            Err(_) => {
                debug!(
                    address = %self.config.address,
                    timeout = ?self.config.timeout(),
                    "Connect timed out"
                );
                false
            }
        };

        self.up
            .get_or_create(&self.labels)
            .set(if up { 1.0 } else { 0.0 });
        self.duration
            .get_or_create(&self.labels)
            .set(elapsed.as_secs_f64());
        Ok(())
    }
}
