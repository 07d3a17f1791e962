//! Host CPU, memory and load metrics via `sysinfo`.

use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;

use metronome_exposition::{GaugeFamily, Labels, exporter_labels};
use metronome_framework::{BlockingExporter, Exporter, ExporterContext, PluginModule};

pub const EXPORTER_TYPE: &str = "system";

pub fn plugin() -> PluginModule {
    PluginModule::new().with_capability(|ctx| Ok(Exporter::blocking(SystemExporter::new(&ctx))))
}

pub struct SystemExporter {
    system: Mutex<System>,
    cpu_usage: GaugeFamily,
    memory_used: GaugeFamily,
    load_average: GaugeFamily,
    exporter: String,
}

impl SystemExporter {
    pub fn new(ctx: &ExporterContext) -> Self {
        let metrics = ctx.metrics();

        // CPU usage is a delta between two refreshes, so take the first sample now.
        let mut system = System::new();
        system.refresh_cpu_usage();

        Self {
            system: Mutex::new(system),
            cpu_usage: metrics.gauge_family("system_cpu_usage_percent", "Global CPU usage"),
            memory_used: metrics.gauge_family("system_memory_used_bytes", "Used memory"),
            load_average: metrics.gauge_family("system_load_average", "System load average"),
            exporter: ctx.qualified_name().to_string(),
        }
    }

    fn labels(&self) -> Labels {
        exporter_labels(&self.exporter)
    }
}

impl BlockingExporter for SystemExporter {
    fn export_metrics(&self) -> anyhow::Result<()> {
        let (cpu, memory) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            (system.global_cpu_usage(), system.used_memory())
        };
        let load = System::load_average();

        let labels = self.labels();
        self.cpu_usage.get_or_create(&labels).set(cpu as f64);
        self.memory_used.get_or_create(&labels).set(memory as f64);

        for (period, value) in [("1m", load.one), ("5m", load.five), ("15m", load.fifteen)] {
            let mut labels = self.labels();
            labels.push(("period".to_string(), period.to_string()));
            self.load_average.get_or_create(&labels).set(value);
        }

        debug!(cpu, memory, load = load.one, "Collected system metrics");
        Ok(())
    }
}
