//! Process lifecycle: bootstrap, exposition listener, scheduler, shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use metronome_common::init_tracing;
use metronome_exposition::{HttpServer, MetricsRegistry, SharedRegistry};

use crate::args::RunnerArgs;
use crate::bootstrap::ExporterBootstrapper;
use crate::config::{AppConfig, MetronomeConfig};
use crate::error::{FrameworkError, Result};
use crate::registry::PluginRegistry;
use crate::scheduler::{Scheduler, SchedulerSettings};

/// How long the listener gets to drain after shutdown.
const LISTENER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the whole exporter pipeline for one configuration.
///
/// # Example
///
/// ```ignore
/// let config = MetronomeConfig::load("config/config.yml")?;
/// let mut plugins = PluginRegistry::new();
/// metronome_exporters::register_builtin(&mut plugins);
///
/// Runner::new(config, plugins).with_dry_run(true).run().await?;
/// ```
pub struct Runner {
    config: MetronomeConfig,
    plugins: Arc<PluginRegistry>,
    metrics: SharedRegistry,
    dry_run: bool,
}

impl Runner {
    pub fn new(config: MetronomeConfig, plugins: PluginRegistry) -> Self {
        Self {
            config,
            plugins: Arc::new(plugins),
            metrics: Arc::new(MetricsRegistry::new()),
            dry_run: false,
        }
    }

    /// Skip every collection call and the metrics listener.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &MetronomeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SharedRegistry {
        &self.metrics
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Bootstrap the configured exporters into a scheduler.
    pub fn bootstrap(&self) -> Result<Scheduler> {
        let bootstrapper = ExporterBootstrapper::new(self.plugins.clone(), self.metrics.clone());
        let exporters = bootstrapper.bootstrap_exporters(&self.config.exporters)?;

        let settings = SchedulerSettings::from_app(&self.config.app).with_dry_run(self.dry_run);
        Ok(Scheduler::new(settings, exporters))
    }

    /// Bind and spawn the metrics listener; `None` in dry-run.
    ///
    /// Binding happens before this returns so a busy port is reported to the
    /// caller. Errors while serving are logged by the listener task.
    pub async fn start_listener(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Option<JoinHandle<()>>> {
        if self.dry_run {
            info!("Dry-run enabled, metrics listener not started");
            return Ok(None);
        }

        let server = HttpServer::on_port(self.metrics.clone(), self.config.app.metrics_port);
        let listener = server
            .bind()
            .await
            .map_err(|e| FrameworkError::Listener(e.to_string()))?;

        Ok(Some(tokio::spawn(async move {
            if let Err(e) = server.serve(listener, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        })))
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            wait_for_signal().await;
            let _ = shutdown_tx.send(true);
        });

        self.run_until(shutdown_rx).await
    }

    /// Run until `shutdown` turns `true`.
    pub async fn run_until(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            mode = %self.config.app.execution_mode,
            dry_run = self.dry_run,
            "Starting metronome"
        );

        let scheduler = self.bootstrap()?;
        let listener = self.start_listener(shutdown.clone()).await?;

        scheduler.run(shutdown).await?;

        if let Some(listener) = listener {
            if tokio::time::timeout(LISTENER_SHUTDOWN_TIMEOUT, listener)
                .await
                .is_err()
            {
                warn!("Metrics listener did not stop in time");
            }
        }

        info!("Goodbye!");
        Ok(())
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("app", &self.config.app)
            .field("exporters", &self.config.exporters.len())
            .field("plugins", &self.plugins)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

async fn wait_for_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Build the multi-threaded runtime; its blocking pool is bounded by
/// `max_blocking_threads`.
pub fn build_runtime(app: &AppConfig) -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(app.max_blocking_threads)
        .thread_name("metronome-worker")
        .build()
}

/// Entry point of a binary: load config, init logging, run until a signal.
///
/// `setup` registers the available exporter plugins.
///
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     run_app(RunnerArgs::parse(), metronome_exporters::register_builtin)
/// }
/// ```
pub fn run_app<F>(args: RunnerArgs, setup: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut PluginRegistry),
{
    let config = MetronomeConfig::load(&args.config)?;
    init_tracing(&args.logging(&config.logging))?;

    info!(config = %args.config.display(), "Loaded configuration");

    let mut plugins = PluginRegistry::new();
    setup(&mut plugins);

    let runtime = build_runtime(&config.app)?;
    let runner = Runner::new(config, plugins).with_dry_run(args.dry_run);
    runtime.block_on(runner.run())?;
    Ok(())
}
