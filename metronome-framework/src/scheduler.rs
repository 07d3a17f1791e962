//! Drives bootstrapped exporters forever under one execution strategy.
//!
//! The strategy is chosen once from [`ExecutionMode`]:
//!
//! - `Sequential`: every round awaits each exporter in bootstrap order.
//! - `Concurrent`: every round issues all calls at once and joins them. Blocking
//!   exporters go to the runtime's bounded blocking pool.
//! - `PerExporterThread`: each exporter gets a dedicated OS thread running its
//!   own collect/sleep loop at its own interval.
//!
//! A failing or panicking exporter is logged and retried at its next turn;
//! nothing else is affected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ExecutionMode};
use crate::error::Result;
use crate::exporter::ExporterInstance;

/// Settings fixed for the life of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub mode: ExecutionMode,
    /// Pause after each round.
    pub interval: Duration,
    /// Skip every collection call but keep the cadence.
    pub dry_run: bool,
}

impl SchedulerSettings {
    pub fn new(mode: ExecutionMode, interval: Duration) -> Self {
        Self {
            mode,
            interval,
            dry_run: false,
        }
    }

    /// Settings taken from the `app` section.
    pub fn from_app(app: &AppConfig) -> Self {
        Self::new(app.execution_mode, app.export_interval())
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Collection calls issued, failed ones included.
    pub invoked: usize,
    /// Calls that returned an error or panicked.
    pub failed: usize,
    /// Calls skipped because of dry-run.
    pub skipped: usize,
    pub elapsed: Duration,
}

impl RoundReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded => self.invoked += 1,
            Outcome::Failed => {
                self.invoked += 1;
                self.failed += 1;
            }
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Runs exporters until shutdown.
pub struct Scheduler {
    settings: SchedulerSettings,
    exporters: Vec<Arc<ExporterInstance>>,
    rounds: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings, exporters: Vec<ExporterInstance>) -> Self {
        Self {
            settings,
            exporters: exporters.into_iter().map(Arc::new).collect(),
            rounds: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn exporters(&self) -> impl Iterator<Item = &ExporterInstance> {
        self.exporters.iter().map(Arc::as_ref)
    }

    /// Number of rounds finished so far.
    ///
    /// With per-exporter threads every worker iteration counts as one round.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Execute exactly one round, without sleeping afterwards.
    ///
    /// Sequential mode awaits exporters one by one; the other modes issue all
    /// calls at once and join them.
    pub async fn run_round(&self) -> RoundReport {
        let started = Instant::now();
        let dry_run = self.settings.dry_run;
        let mut report = RoundReport::default();

        match self.settings.mode {
            ExecutionMode::Sequential => {
                for exporter in &self.exporters {
                    report.record(invoke(exporter, dry_run).await);
                }
            }
            ExecutionMode::Concurrent | ExecutionMode::PerExporterThread => {
                let outcomes =
                    join_all(self.exporters.iter().map(|exporter| invoke(exporter, dry_run)))
                        .await;
                for outcome in outcomes {
                    report.record(outcome);
                }
            }
        }

        report.elapsed = started.elapsed();
        self.rounds.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Run until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            mode = %self.settings.mode,
            exporters = self.exporters.len(),
            interval = ?self.settings.interval,
            dry_run = self.settings.dry_run,
            "Starting scheduler"
        );

        if self.exporters.is_empty() {
            warn!("No exporters to run, waiting for shutdown");
            wait_for_shutdown(shutdown).await;
        } else {
            match self.settings.mode {
                ExecutionMode::PerExporterThread => self.run_per_exporter(shutdown).await?,
                ExecutionMode::Sequential | ExecutionMode::Concurrent => {
                    self.run_rounds(shutdown).await
                }
            }
        }

        info!(rounds = self.rounds_completed(), "Scheduler stopped");
        Ok(())
    }

    async fn run_rounds(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let report = self.run_round().await;
            if report.failed > 0 {
                warn!(
                    failed = report.failed,
                    invoked = report.invoked,
                    "Round completed with failures"
                );
            } else {
                debug!(
                    invoked = report.invoked,
                    skipped = report.skipped,
                    elapsed = ?report.elapsed,
                    "Round completed"
                );
            }

            debug!("Sleeping for {:?}", self.settings.interval);
            if sleep_or_shutdown(self.settings.interval, &mut shutdown).await {
                break;
            }
        }
    }

    async fn run_per_exporter(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let handle = Handle::current();
        let mut finished = Vec::with_capacity(self.exporters.len());

        for exporter in &self.exporters {
            let worker = Worker {
                exporter: Arc::clone(exporter),
                interval: exporter.interval().unwrap_or(self.settings.interval),
                dry_run: self.settings.dry_run,
                rounds: Arc::clone(&self.rounds),
            };
            let shutdown = shutdown.clone();
            let handle = handle.clone();
            let (done_tx, done_rx) = oneshot::channel::<()>();

            std::thread::Builder::new()
                .name(format!("exporter-{}", exporter.qualified_name()))
                .spawn(move || {
                    handle.block_on(worker.run(shutdown));
                    let _ = done_tx.send(());
                })?;
            finished.push(done_rx);
        }

        // A worker that dies closes its channel, which also resolves here.
        join_all(finished).await;
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .field("exporters", &self.exporters.len())
            .field("rounds", &self.rounds_completed())
            .finish()
    }
}

/// Loop of one exporter on its dedicated thread.
struct Worker {
    exporter: Arc<ExporterInstance>,
    interval: Duration,
    dry_run: bool,
    rounds: Arc<AtomicU64>,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(exporter = %self.exporter, interval = ?self.interval, "Exporter worker started");

        while !*shutdown.borrow() {
            if self.dry_run {
                skip(&self.exporter);
            } else {
                log_outcome(&self.exporter, self.exporter.collect_inline().await);
            }
            self.rounds.fetch_add(1, Ordering::Relaxed);

            debug!(exporter = %self.exporter, "Sleeping for {:?}", self.interval);
            if sleep_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        debug!(exporter = %self.exporter, "Exporter worker stopped");
    }
}

/// Issue one collection call, containing its failure.
async fn invoke(exporter: &ExporterInstance, dry_run: bool) -> Outcome {
    if dry_run {
        return skip(exporter);
    }
    log_outcome(exporter, exporter.collect().await)
}

fn skip(exporter: &ExporterInstance) -> Outcome {
    debug!(
        "Skipping 'export_metrics' of exporter '{}' (dry-run enabled)",
        exporter
    );
    Outcome::Skipped
}

fn log_outcome(exporter: &ExporterInstance, result: Result<()>) -> Outcome {
    match result {
        Ok(()) => Outcome::Succeeded,
        Err(e) => {
            error!(exporter = %exporter, "{}", e);
            Outcome::Failed
        }
    }
}

/// Sleep for `interval`; returns `true` if shutdown was requested meanwhile.
async fn sleep_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
