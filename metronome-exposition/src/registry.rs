//! Shared Prometheus metric registry that exporters publish into.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::{Mutex, RwLock};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::{debug, warn};

/// Label set of a single series, as `(name, value)` pairs.
pub type Labels = Vec<(String, String)>;

/// A family of floating point gauges keyed by label set.
pub type GaugeFamily = Family<Labels, Gauge<f64, AtomicU64>>;

/// A family of monotonic counters keyed by label set.
pub type CounterFamily = Family<Labels, Counter>;

/// Reference-counted handle to a [`MetricsRegistry`].
pub type SharedRegistry = Arc<MetricsRegistry>;

/// Thread-safe wrapper around a `prometheus-client` [`Registry`].
///
/// Families are registered once per metric name; every exporter asking for
/// the same name receives a handle to the same family and tells its series
/// apart through labels (conventionally `exporter="<qualified name>"`).
pub struct MetricsRegistry {
    registry: RwLock<Registry>,
    gauges: Mutex<HashMap<String, GaugeFamily>>,
    counters: Mutex<HashMap<String, CounterFamily>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::from_registry(Registry::default())
    }

    /// Create an empty registry whose metric names are all prefixed.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::from_registry(Registry::with_prefix(prefix))
    }

    fn from_registry(registry: Registry) -> Self {
        Self {
            registry: RwLock::new(registry),
            gauges: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Get the gauge family registered under `name`, registering it on first use.
    pub fn gauge_family(&self, name: &str, help: &str) -> GaugeFamily {
        let mut gauges = self.gauges.lock();
        if let Some(family) = gauges.get(name) {
            return family.clone();
        }

        let family = GaugeFamily::default();
        self.registry.write().register(name, help, family.clone());
        gauges.insert(name.to_string(), family.clone());
        debug!(metric = %name, "Registered gauge family");
        family
    }

    /// Get the counter family registered under `name`, registering it on first use.
    ///
    /// The text encoding appends `_total` to counter names.
    pub fn counter_family(&self, name: &str, help: &str) -> CounterFamily {
        let mut counters = self.counters.lock();
        if let Some(family) = counters.get(name) {
            return family.clone();
        }

        let family = CounterFamily::default();
        self.registry.write().register(name, help, family.clone());
        counters.insert(name.to_string(), family.clone());
        debug!(metric = %name, "Registered counter family");
        family
    }

    /// Number of registered metric families.
    pub fn family_count(&self) -> usize {
        self.gauges.lock().len() + self.counters.lock().len()
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let registry = self.registry.read();
        let mut output = String::new();
        if let Err(e) = encode(&mut output, &registry) {
            warn!(error = %e, "Failed to encode metrics");
        }
        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("families", &self.family_count())
            .finish_non_exhaustive()
    }
}

/// Build the conventional label set for a series owned by one exporter.
pub fn exporter_labels(exporter: &str) -> Labels {
    vec![("exporter".to_string(), exporter.to_string())]
}
