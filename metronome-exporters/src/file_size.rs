//! Total size of the files matching a set of glob patterns.

use serde::Deserialize;
use tracing::{debug, warn};

use metronome_exposition::{GaugeFamily, Labels, exporter_labels};
use metronome_framework::{
    BlockingExporter, Exporter, ExporterConfig, ExporterContext, PluginModule,
};

pub const EXPORTER_TYPE: &str = "file_size";

/// `file_size` exporter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSizeConfig {
    /// Glob patterns, e.g. `/var/log/**/*.log`.
    pub patterns: Vec<String>,
}

impl ExporterConfig for FileSizeConfig {
    fn validate(&self) -> Result<(), String> {
        if self.patterns.is_empty() {
            return Err("patterns must not be empty".to_string());
        }
        for pattern in &self.patterns {
            glob::Pattern::new(pattern)
                .map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
        }
        Ok(())
    }
}

pub fn plugin() -> PluginModule {
    PluginModule::new()
        .with_config::<FileSizeConfig>()
        .with_capability(|ctx| Ok(Exporter::blocking(FileSizeExporter::new(&ctx)?)))
}

pub struct FileSizeExporter {
    patterns: Vec<String>,
    bytes: GaugeFamily,
    files: GaugeFamily,
    labels: Labels,
}

impl FileSizeExporter {
    pub fn new(ctx: &ExporterContext) -> anyhow::Result<Self> {
        let config = ctx.require_config::<FileSizeConfig>()?;
        let metrics = ctx.metrics();

        Ok(Self {
            patterns: config.patterns.clone(),
            bytes: metrics.gauge_family("file_size_bytes", "Total size of the matched files"),
            files: metrics.gauge_family("file_size_files", "Number of matched files"),
            labels: exporter_labels(ctx.qualified_name().as_str()),
        })
    }

    /// Sum the sizes of all regular files matching any pattern.
    ///
    /// A file matched by several patterns is counted once.
    fn measure(&self) -> anyhow::Result<(u64, usize)> {
        let mut seen = std::collections::HashSet::new();
        let mut total = 0u64;

        for pattern in &self.patterns {
            for entry in glob::glob(pattern)? {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "Unreadable path");
                        continue;
                    }
                };

                match std::fs::metadata(&path) {
                    Ok(metadata) if metadata.is_file() => {
                        if seen.insert(path) {
                            total += metadata.len();
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to stat file"),
                }
            }
        }

        Ok((total, seen.len()))
    }
}

impl BlockingExporter for FileSizeExporter {
    fn export_metrics(&self) -> anyhow::Result<()> {
        let (bytes, files) = self.measure()?;
        debug!(bytes, files, "Measured files");

        self.bytes.get_or_create(&self.labels).set(bytes as f64);
        self.files.get_or_create(&self.labels).set(files as f64);
        Ok(())
    }
}
