//! Plugin registry mapping exporter types to their code.
//!
//! Plugins are registered explicitly at startup as loader functions. A type
//! is "loaded" the first time it is resolved: its loader runs exactly once and
//! the resulting [`PluginModule`] is cached for the life of the registry, even
//! when several threads resolve the same type concurrently.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{FrameworkError, PluginSymbol, Result};
use crate::exporter::{Exporter, ExporterConfig, ExporterContext, ValidatedConfig};

/// Constructor of exporters of one type.
pub type ExporterFactory =
    Arc<dyn Fn(ExporterContext) -> anyhow::Result<Exporter> + Send + Sync + 'static>;

/// Produces the plugin unit of one type.
pub type PluginLoader = Arc<dyn Fn() -> PluginModule + Send + Sync + 'static>;

type ConfigParser =
    dyn Fn(Value) -> std::result::Result<ValidatedConfig, String> + Send + Sync + 'static;

/// Configuration schema of an exporter type.
#[derive(Clone)]
pub struct ConfigSchema {
    parse: Arc<ConfigParser>,
    type_name: &'static str,
}

impl ConfigSchema {
    /// Schema that deserializes into `C` and runs its validation.
    pub fn of<C: ExporterConfig>() -> Self {
        Self {
            parse: Arc::new(|raw: Value| -> std::result::Result<ValidatedConfig, String> {
                let config: C = serde_json::from_value(raw).map_err(|e| e.to_string())?;
                config.validate()?;
                Ok(ValidatedConfig::new(config))
            }),
            type_name: std::any::type_name::<C>(),
        }
    }

    /// Build a validated config object from a raw mapping.
    pub fn validate(
        &self,
        raw: &Map<String, Value>,
    ) -> std::result::Result<ValidatedConfig, String> {
        (self.parse)(Value::Object(raw.clone()))
    }

    /// Name of the Rust type backing this schema.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for ConfigSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSchema")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// The entry points a plugin type provides.
///
/// Both are optional at registration time; a missing one is reported when a
/// descriptor actually needs it.
#[derive(Clone, Default)]
pub struct PluginModule {
    capability: Option<ExporterFactory>,
    config_schema: Option<ConfigSchema>,
}

impl PluginModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the exporter constructor.
    pub fn with_capability<F>(mut self, factory: F) -> Self
    where
        F: Fn(ExporterContext) -> anyhow::Result<Exporter> + Send + Sync + 'static,
    {
        self.capability = Some(Arc::new(factory));
        self
    }

    /// Set the configuration schema to `C`.
    pub fn with_config<C: ExporterConfig>(mut self) -> Self {
        self.config_schema = Some(ConfigSchema::of::<C>());
        self
    }

    pub fn capability(&self) -> Option<&ExporterFactory> {
        self.capability.as_ref()
    }

    pub fn config_schema(&self) -> Option<&ConfigSchema> {
        self.config_schema.as_ref()
    }
}

/// Registry of exporter plugins with load-once caching.
#[derive(Default)]
pub struct PluginRegistry {
    loaders: HashMap<String, PluginLoader>,
    bindings: Mutex<HashMap<String, Arc<OnceLock<Arc<PluginModule>>>>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the loader of a plugin type.
    ///
    /// Registering a type twice replaces the previous loader.
    pub fn register<F>(&mut self, exporter_type: impl Into<String>, loader: F) -> &mut Self
    where
        F: Fn() -> PluginModule + Send + Sync + 'static,
    {
        let exporter_type = exporter_type.into();
        if self
            .loaders
            .insert(exporter_type.clone(), Arc::new(loader))
            .is_some()
        {
            warn!(exporter_type = %exporter_type, "Replacing registered exporter plugin");
        }
        self.bindings.get_mut().remove(&exporter_type);
        self
    }

    /// Register an already built plugin unit.
    pub fn register_module(
        &mut self,
        exporter_type: impl Into<String>,
        module: PluginModule,
    ) -> &mut Self {
        self.register(exporter_type, move || module.clone())
    }

    /// Whether a loader is registered for `exporter_type`.
    pub fn contains(&self, exporter_type: &str) -> bool {
        self.loaders.contains_key(exporter_type)
    }

    /// Registered type identifiers, sorted.
    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Number of types whose plugin unit has been loaded.
    pub fn loaded_count(&self) -> usize {
        self.bindings
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    /// Resolve the exporter constructor of `exporter_type`.
    pub fn resolve_capability(&self, exporter_type: &str) -> Result<ExporterFactory> {
        debug!(exporter_type = %exporter_type, "Loading capability of exporter");
        self.load(exporter_type)
            .and_then(|module| module.capability.clone())
            .ok_or_else(|| FrameworkError::plugin_load(exporter_type, PluginSymbol::Capability))
    }

    /// Resolve the configuration schema of `exporter_type`.
    pub fn resolve_config_schema(&self, exporter_type: &str) -> Result<ConfigSchema> {
        debug!(exporter_type = %exporter_type, "Loading config schema of exporter");
        self.load(exporter_type)
            .and_then(|module| module.config_schema.clone())
            .ok_or_else(|| FrameworkError::plugin_load(exporter_type, PluginSymbol::Config))
    }

    /// Load the plugin unit of a type, at most once.
    fn load(&self, exporter_type: &str) -> Option<Arc<PluginModule>> {
        let loader = self.loaders.get(exporter_type)?;

        // The map lock only guards slot creation; the loader itself runs
        // under the slot's OnceLock so other types are not held up.
        let slot = Arc::clone(
            self.bindings
                .lock()
                .entry(exporter_type.to_string())
                .or_default(),
        );

        let module = slot.get_or_init(|| {
            debug!(exporter_type = %exporter_type, "Loading exporter plugin");
            Arc::new(loader())
        });

        Some(Arc::clone(module))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("registered", &self.registered_types())
            .field("loaded", &self.loaded_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::BlockingExporter;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    impl BlockingExporter for Noop {
        fn export_metrics(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Deserialize)]
    struct S3Config {
        bucket_name: String,
        key_prefix: String,
    }

    impl ExporterConfig for S3Config {
        fn validate(&self) -> std::result::Result<(), String> {
            if self.bucket_name.is_empty() {
                return Err("bucket_name must not be empty".to_string());
            }
            Ok(())
        }
    }

    fn s3_module() -> PluginModule {
        PluginModule::new()
            .with_capability(|_ctx| Ok(Exporter::blocking(Noop)))
            .with_config::<S3Config>()
    }

    fn counting_registry(loads: Arc<AtomicUsize>) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry.register("s3_size", move || {
            loads.fetch_add(1, Ordering::SeqCst);
            s3_module()
        });
        registry
    }

    #[test]
    fn test_capability_is_cached() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(loads.clone());

        let first = registry.resolve_capability("s3_size").unwrap();
        let second = registry.resolve_capability("s3_size").unwrap();
        let _schema = registry.resolve_config_schema("s3_size").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.loaded_count(), 1);
    }

    #[test]
    fn test_concurrent_first_resolution_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(loads.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.resolve_capability("s3_size").unwrap())
            })
            .collect();

        let factories: Vec<ExporterFactory> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        for factory in &factories[1..] {
            assert!(Arc::ptr_eq(&factories[0], factory));
        }
    }

    #[test]
    fn test_unknown_type() {
        let registry = PluginRegistry::new();

        let err = registry.resolve_capability("missing").err().unwrap();
        assert!(matches!(
            err,
            FrameworkError::PluginLoad {
                ref exporter_type,
                missing: PluginSymbol::Capability,
            } if exporter_type == "missing"
        ));

        let err = registry.resolve_config_schema("missing").err().unwrap();
        assert!(matches!(
            err,
            FrameworkError::PluginLoad {
                missing: PluginSymbol::Config,
                ..
            }
        ));
        assert_eq!(registry.loaded_count(), 0);
    }

    #[test]
    fn test_missing_entry_points() {
        let mut registry = PluginRegistry::new();
        registry
            .register_module("config_only", PluginModule::new().with_config::<S3Config>())
            .register_module(
                "capability_only",
                PluginModule::new().with_capability(|_ctx| Ok(Exporter::blocking(Noop))),
            );

        let err = registry.resolve_capability("config_only").err().unwrap();
        assert_eq!(
            err.to_string(),
            "Failed to load capability of exporter type 'config_only'"
        );

        let err = registry.resolve_config_schema("capability_only").err().unwrap();
        assert_eq!(
            err.to_string(),
            "Failed to load config of exporter type 'capability_only'"
        );

        assert!(registry.resolve_config_schema("config_only").is_ok());
        assert!(registry.resolve_capability("capability_only").is_ok());
    }

    #[test]
    fn test_config_schema_validation() {
        let schema = ConfigSchema::of::<S3Config>();

        let valid = json!({"bucket_name": "logs", "key_prefix": "2024/"});
        let config = schema.validate(valid.as_object().unwrap()).unwrap();
        let config = config.downcast_ref::<S3Config>().unwrap();
        assert_eq!(config.bucket_name, "logs");
        assert_eq!(config.key_prefix, "2024/");

        let missing = json!({"bucket_name": "logs"});
        let err = schema.validate(missing.as_object().unwrap()).unwrap_err();
        assert!(err.contains("key_prefix"), "{}", err);

        let empty = json!({"bucket_name": "", "key_prefix": "x"});
        let err = schema.validate(empty.as_object().unwrap()).unwrap_err();
        assert_eq!(err, "bucket_name must not be empty");
    }

    #[test]
    fn test_registered_types() {
        let mut registry = PluginRegistry::new();
        registry.register_module("b", s3_module());
        registry.register_module("a", s3_module());

        assert_eq!(registry.registered_types(), vec!["a", "b"]);
        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
    }
}
