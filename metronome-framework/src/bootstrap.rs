//! Builds runnable exporter instances from descriptors.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tracing::{debug, info};

use metronome_exposition::SharedRegistry;

use crate::config::ExporterSettings;
use crate::error::{FrameworkError, Result};
use crate::exporter::{ExporterContext, ExporterInstance, panic_message};
use crate::registry::PluginRegistry;

/// Turns exporter descriptors into [`ExporterInstance`]s using a [`PluginRegistry`].
///
/// Bootstrapping stops at the first descriptor that fails to load or
/// validate; no partial list is returned.
#[derive(Debug, Clone)]
pub struct ExporterBootstrapper {
    plugins: Arc<PluginRegistry>,
    metrics: SharedRegistry,
}

impl ExporterBootstrapper {
    pub fn new(plugins: Arc<PluginRegistry>, metrics: SharedRegistry) -> Self {
        Self { plugins, metrics }
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// Bootstrap every enabled descriptor, preserving their relative order.
    pub fn bootstrap_exporters(
        &self,
        descriptors: &[ExporterSettings],
    ) -> Result<Vec<ExporterInstance>> {
        info!(count = descriptors.len(), "Bootstrapping exporters...");

        let mut exporters = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if !descriptor.enabled {
                info!(
                    exporter = %descriptor.qualified_name(),
                    "Skipping disabled exporter"
                );
                continue;
            }
            exporters.push(self.bootstrap_exporter(descriptor)?);
        }

        info!(
            bootstrapped = exporters.len(),
            skipped = descriptors.len() - exporters.len(),
            "Bootstrapped all exporters successfully"
        );
        Ok(exporters)
    }

    /// Bootstrap a single descriptor, regardless of its `enabled` flag.
    pub fn bootstrap_exporter(&self, descriptor: &ExporterSettings) -> Result<ExporterInstance> {
        let qualified_name = descriptor.qualified_name();

        let config = match descriptor.raw_config() {
            Some(raw) => {
                let schema = self.plugins.resolve_config_schema(&descriptor.exporter_type)?;
                debug!(
                    exporter = %qualified_name,
                    schema = schema.type_name(),
                    "Validating config of exporter"
                );
                let validated =
                    schema
                        .validate(raw)
                        .map_err(|detail| FrameworkError::PluginConfigValidation {
                            exporter_type: descriptor.exporter_type.clone(),
                            exporter: qualified_name.clone(),
                            detail,
                        })?;
                Some(validated)
            }
            None => None,
        };

        let factory = self.plugins.resolve_capability(&descriptor.exporter_type)?;
        let context = ExporterContext::new(descriptor.clone(), config, self.metrics.clone());

        debug!(exporter = %qualified_name, "Initializing exporter");
        let constructed = std::panic::catch_unwind(AssertUnwindSafe(|| factory(context.clone())))
            .map_err(|payload| panic_message(payload.as_ref()))
            .and_then(|result| result.map_err(|e| format!("{:#}", e)));
        let exporter = constructed.map_err(|detail| FrameworkError::PluginConfigValidation {
            exporter_type: descriptor.exporter_type.clone(),
            exporter: qualified_name.clone(),
            detail,
        })?;

        let instance = ExporterInstance::new(context, exporter);
        info!(exporter = ?instance, "Bootstrapped exporter");
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginSymbol;
    use crate::exporter::{BlockingExporter, Exporter, ExporterConfig};
    use crate::registry::PluginModule;
    use metronome_exposition::MetricsRegistry;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize)]
    struct S3Config {
        bucket_name: String,
    }

    impl ExporterConfig for S3Config {}

    struct S3Exporter {
        bucket: Option<String>,
    }

    impl BlockingExporter for S3Exporter {
        fn export_metrics(&self) -> anyhow::Result<()> {
            match &self.bucket {
                Some(bucket) if bucket.is_empty() => anyhow::bail!("empty bucket name"),
                _ => Ok(()),
            }
        }
    }

    struct Loads {
        s3: Arc<AtomicUsize>,
        other: Arc<AtomicUsize>,
        /// Constructor calls of the `other` capability.
        other_built: Arc<AtomicUsize>,
    }

    fn registry() -> (PluginRegistry, Loads) {
        let loads = Loads {
            s3: Arc::new(AtomicUsize::new(0)),
            other: Arc::new(AtomicUsize::new(0)),
            other_built: Arc::new(AtomicUsize::new(0)),
        };
        let mut registry = PluginRegistry::new();

        let s3 = loads.s3.clone();
        registry.register("s3_size", move || {
            s3.fetch_add(1, Ordering::SeqCst);
            PluginModule::new()
                .with_config::<S3Config>()
                .with_capability(|ctx| {
                    let bucket = ctx.config::<S3Config>().map(|c| c.bucket_name.clone());
                    Ok(Exporter::blocking(S3Exporter { bucket }))
                })
        });

        let other = loads.other.clone();
        let other_built = loads.other_built.clone();
        registry.register("other", move || {
            other.fetch_add(1, Ordering::SeqCst);
            let built = other_built.clone();
            PluginModule::new().with_capability(move |_ctx| {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(Exporter::blocking(S3Exporter { bucket: None }))
            })
        });

        registry.register_module(
            "strict",
            PluginModule::new().with_capability(|ctx| {
                ctx.require_config::<S3Config>()?;
                Ok(Exporter::blocking(S3Exporter { bucket: None }))
            }),
        );

        registry.register_module(
            "exploding",
            PluginModule::new().with_capability(|_ctx| -> anyhow::Result<Exporter> {
                panic!("constructor exploded")
            }),
        );

        (registry, loads)
    }

    fn bootstrapper(registry: PluginRegistry) -> ExporterBootstrapper {
        ExporterBootstrapper::new(Arc::new(registry), Arc::new(MetricsRegistry::new()))
    }

    fn names(instances: &[ExporterInstance]) -> Vec<String> {
        instances.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_disabled_descriptors_are_skipped_in_order() {
        let (registry, loads) = registry();
        let bootstrapper = bootstrapper(registry);

        let descriptors = vec![
            ExporterSettings::new("other").with_name("a"),
            ExporterSettings::new("s3_size")
                .with_name("b")
                .with_enabled(false),
            ExporterSettings::new("other").with_name("c"),
            ExporterSettings::new("other").with_name("d").with_enabled(false),
            ExporterSettings::new("other").with_name("e"),
        ];

        let instances = bootstrapper.bootstrap_exporters(&descriptors).unwrap();

        assert_eq!(names(&instances), vec!["other.a", "other.c", "other.e"]);
        // The only s3_size descriptor is disabled, so its plugin is never loaded.
        assert_eq!(loads.s3.load(Ordering::SeqCst), 0);
        assert_eq!(loads.other.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_is_validated_and_passed_to_exporter() {
        let (registry, loads) = registry();
        let bootstrapper = bootstrapper(registry);

        let descriptors = vec![
            ExporterSettings::new("s3_size")
                .with_name("logs")
                .with_config(json!({"bucket_name": "logs"})),
            ExporterSettings::new("s3_size")
                .with_name("backups")
                .with_config(json!({"bucket_name": "backups"})),
        ];

        let instances = bootstrapper.bootstrap_exporters(&descriptors).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(
            instances[1]
                .context()
                .config::<S3Config>()
                .unwrap()
                .bucket_name,
            "backups"
        );
        assert_eq!(loads.s3.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_config_aborts_bootstrap() {
        let (registry, loads) = registry();
        let bootstrapper = bootstrapper(registry);

        let descriptors = vec![
            ExporterSettings::new("other"),
            ExporterSettings::new("s3_size")
                .with_name("bad")
                .with_config(json!({"bucket": "typo"})),
            ExporterSettings::new("other").with_name("later"),
        ];

        let err = bootstrapper.bootstrap_exporters(&descriptors).unwrap_err();
        match err {
            FrameworkError::PluginConfigValidation {
                exporter_type,
                exporter,
                detail,
            } => {
                assert_eq!(exporter_type, "s3_size");
                assert_eq!(exporter.as_str(), "s3_size.bad");
                assert!(detail.contains("bucket_name"), "{}", detail);
            }
            other => panic!("unexpected error: {}", other),
        }
        // Only the first descriptor was constructed; "later" never was.
        assert_eq!(loads.other_built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_constructor_is_reported_as_config_error() {
        let (registry, loads) = registry();
        let bootstrapper = bootstrapper(registry);

        let descriptors = vec![
            ExporterSettings::new("exploding").with_name("x"),
            ExporterSettings::new("other"),
        ];

        let err = bootstrapper.bootstrap_exporters(&descriptors).unwrap_err();
        match err {
            FrameworkError::PluginConfigValidation {
                exporter_type,
                exporter,
                detail,
            } => {
                assert_eq!(exporter_type, "exploding");
                assert_eq!(exporter.as_str(), "exploding.x");
                assert_eq!(detail, "panicked: constructor exploded");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(loads.other_built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_capability_names_type() {
        let (mut registry, _loads) = registry();
        registry.register_module("schema_only", PluginModule::new().with_config::<S3Config>());
        let bootstrapper = bootstrapper(registry);

        let err = bootstrapper
            .bootstrap_exporters(&[ExporterSettings::new("schema_only")])
            .unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::PluginLoad {
                ref exporter_type,
                missing: PluginSymbol::Capability,
            } if exporter_type == "schema_only"
        ));
    }

    #[test]
    fn test_config_without_schema_fails_to_load() {
        let (registry, _loads) = registry();
        let bootstrapper = bootstrapper(registry);

        let err = bootstrapper
            .bootstrap_exporter(&ExporterSettings::new("other").with_config(json!({"x": 1})))
            .unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::PluginLoad {
                missing: PluginSymbol::Config,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_config_skips_schema() {
        let (registry, _loads) = registry();
        let bootstrapper = bootstrapper(registry);

        let instance = bootstrapper
            .bootstrap_exporter(&ExporterSettings::new("other").with_config(json!({})))
            .unwrap();
        assert_eq!(instance.to_string(), "other");
    }

    #[tokio::test]
    async fn test_validated_config_reaches_exporter() {
        let (registry, _loads) = registry();
        let bootstrapper = bootstrapper(registry);

        let empty = bootstrapper
            .bootstrap_exporter(
                &ExporterSettings::new("s3_size").with_config(json!({"bucket_name": ""})),
            )
            .unwrap();
        let err = empty.collect().await.unwrap_err();
        assert!(err.to_string().contains("empty bucket name"), "{}", err);
    }

    #[test]
    fn test_constructor_failure_is_reported_as_config_error() {
        let (registry, _loads) = registry();
        let bootstrapper = bootstrapper(registry);

        let err = bootstrapper
            .bootstrap_exporter(&ExporterSettings::new("strict").with_name("x"))
            .unwrap_err();
        assert!(matches!(err, FrameworkError::PluginConfigValidation { .. }));
        assert!(err.to_string().contains("requires a config section"));
    }

    #[test]
    fn test_unknown_type_fails() {
        let (registry, _loads) = registry();
        let bootstrapper = bootstrapper(registry);

        let err = bootstrapper
            .bootstrap_exporters(&[ExporterSettings::new("nope")])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to load capability of exporter type 'nope'"
        );
    }
}
