//! The exporter capability contract and the runnable instances built from it.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tracing::{Instrument, Span};

use metronome_exposition::SharedRegistry;

use crate::config::ExporterSettings;
use crate::error::{FrameworkError, Result};

/// Target of every exporter's logging span.
pub const EXPORTERS_LOG_TARGET: &str = "exporters";

/// Display identity of an exporter: `type` or `type.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName(String);

impl QualifiedName {
    pub fn new(exporter_type: &str, name: Option<&str>) -> Self {
        match name {
            Some(name) => Self(format!("{}.{}", exporter_type, name)),
            None => Self(exporter_type.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed configuration of an exporter type.
///
/// The raw `config` mapping of a descriptor is deserialized into the
/// implementing type, then [`validate`](Self::validate) is called.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Deserialize)]
/// pub struct S3SizeConfig {
///     pub bucket_name: String,
///     pub key_prefix: String,
/// }
///
/// impl ExporterConfig for S3SizeConfig {
///     fn validate(&self) -> Result<(), String> {
///         if self.bucket_name.is_empty() {
///             return Err("bucket_name must not be empty".to_string());
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait ExporterConfig: DeserializeOwned + Send + Sync + 'static {
    /// Check constraints serde cannot express.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// A validated, type-erased exporter config.
#[derive(Clone)]
pub struct ValidatedConfig {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ValidatedConfig {
    pub fn new<C: Any + Send + Sync>(config: C) -> Self {
        Self {
            value: Arc::new(config),
            type_name: std::any::type_name::<C>(),
        }
    }

    /// Borrow the config as its concrete type.
    pub fn downcast_ref<C: Any>(&self) -> Option<&C> {
        self.value.downcast_ref::<C>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Everything an exporter receives at construction.
///
/// Built once by the bootstrapper and never modified afterwards.
#[derive(Debug, Clone)]
pub struct ExporterContext {
    settings: ExporterSettings,
    config: Option<ValidatedConfig>,
    qualified_name: QualifiedName,
    span: Span,
    metrics: SharedRegistry,
}

impl ExporterContext {
    /// Create a context for the given descriptor.
    ///
    /// The logging span is scoped by `(exporters, type, name)`.
    pub fn new(
        settings: ExporterSettings,
        config: Option<ValidatedConfig>,
        metrics: SharedRegistry,
    ) -> Self {
        let qualified_name = settings.qualified_name();
        let span = tracing::info_span!(
            target: EXPORTERS_LOG_TARGET,
            "exporter",
            exporter_type = %settings.exporter_type,
            name = settings.name.as_deref().unwrap_or(""),
        );

        Self {
            settings,
            config,
            qualified_name,
            span,
            metrics,
        }
    }

    /// The descriptor this exporter was built from.
    pub fn settings(&self) -> &ExporterSettings {
        &self.settings
    }

    pub fn exporter_type(&self) -> &str {
        &self.settings.exporter_type
    }

    pub fn name(&self) -> Option<&str> {
        self.settings.name.as_deref()
    }

    pub fn qualified_name(&self) -> &QualifiedName {
        &self.qualified_name
    }

    /// Logging scope of this exporter.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Shared metric registry to publish into.
    pub fn metrics(&self) -> &SharedRegistry {
        &self.metrics
    }

    /// The validated config, if the descriptor supplied one.
    pub fn config<C: Any>(&self) -> Option<&C> {
        self.config.as_ref().and_then(|c| c.downcast_ref::<C>())
    }

    /// The validated config, or an error naming what is missing.
    pub fn require_config<C: Any>(&self) -> anyhow::Result<&C> {
        self.config::<C>().ok_or_else(|| {
            anyhow::anyhow!(
                "exporter '{}' requires a config section",
                self.qualified_name
            )
        })
    }
}

/// An exporter whose collection is a blocking call.
pub trait BlockingExporter: Send + Sync + 'static {
    /// Collect and publish metrics now.
    fn export_metrics(&self) -> anyhow::Result<()>;
}

/// An exporter whose collection is a cooperative (async) call.
#[async_trait]
pub trait AsyncExporter: Send + Sync + 'static {
    /// Collect and publish metrics now.
    async fn export_metrics(&self) -> anyhow::Result<()>;
}

/// A pluggable exporter, in either calling convention.
#[derive(Clone)]
pub enum Exporter {
    Blocking(Arc<dyn BlockingExporter>),
    Async(Arc<dyn AsyncExporter>),
}

impl Exporter {
    pub fn blocking(exporter: impl BlockingExporter) -> Self {
        Self::Blocking(Arc::new(exporter))
    }

    pub fn cooperative(exporter: impl AsyncExporter) -> Self {
        Self::Async(Arc::new(exporter))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("Exporter::Blocking"),
            Self::Async(_) => f.write_str("Exporter::Async"),
        }
    }
}

/// A bootstrapped exporter ready to be scheduled.
pub struct ExporterInstance {
    context: ExporterContext,
    exporter: Exporter,
    interval: Option<Duration>,
}

impl ExporterInstance {
    pub fn new(context: ExporterContext, exporter: Exporter) -> Self {
        let interval = context.settings().interval();
        Self {
            context,
            exporter,
            interval,
        }
    }

    /// Override the interval used when this exporter runs on its own worker.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn context(&self) -> &ExporterContext {
        &self.context
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    pub fn qualified_name(&self) -> &QualifiedName {
        self.context.qualified_name()
    }

    /// Per-exporter interval override, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Run one collection, offloading it from the calling task.
    ///
    /// Blocking exporters run on the runtime's blocking pool, cooperative ones
    /// on their own task. Errors and panics are both reported as
    /// [`FrameworkError::Collection`].
    pub async fn collect(&self) -> Result<()> {
        let span = self.context.span().clone();

        let joined = match &self.exporter {
            Exporter::Blocking(exporter) => {
                let exporter = Arc::clone(exporter);
                tokio::task::spawn_blocking(move || span.in_scope(|| exporter.export_metrics()))
                    .await
            }
            Exporter::Async(exporter) => {
                let exporter = Arc::clone(exporter);
                tokio::spawn(async move { exporter.export_metrics().await }.instrument(span)).await
            }
        };

        match joined {
            Ok(result) => result.map_err(|e| self.collection_error(e)),
            Err(e) if e.is_panic() => Err(FrameworkError::collection(
                self.qualified_name(),
                panic_message(e.into_panic().as_ref()),
            )),
            Err(e) => Err(FrameworkError::collection(
                self.qualified_name(),
                e.to_string(),
            )),
        }
    }

    /// Run one collection on the calling thread.
    ///
    /// Used by dedicated per-exporter workers, where blocking the current
    /// thread is the intended behaviour.
    pub async fn collect_inline(&self) -> Result<()> {
        let span = self.context.span().clone();

        let caught = match &self.exporter {
            Exporter::Blocking(exporter) => std::panic::catch_unwind(AssertUnwindSafe(|| {
                span.in_scope(|| exporter.export_metrics())
            })),
            Exporter::Async(exporter) => {
                AssertUnwindSafe(exporter.export_metrics().instrument(span))
                    .catch_unwind()
                    .await
            }
        };

        match caught {
            Ok(result) => result.map_err(|e| self.collection_error(e)),
            Err(payload) => Err(FrameworkError::collection(
                self.qualified_name(),
                panic_message(payload.as_ref()),
            )),
        }
    }

    fn collection_error(&self, error: anyhow::Error) -> FrameworkError {
        FrameworkError::collection(self.qualified_name(), format!("{:#}", error))
    }
}

impl fmt::Display for ExporterInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.qualified_name().fmt(f)
    }
}

impl fmt::Debug for ExporterInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settings = self.context.settings();
        write!(
            f,
            "<Exporter type={} name={} enabled={}>",
            settings.exporter_type,
            settings.name.as_deref().unwrap_or("None"),
            settings.enabled
        )
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
