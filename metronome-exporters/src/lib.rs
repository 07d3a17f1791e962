//! Built-in exporter plugins.
//!
//! | Type | Kind | Metrics |
//! |---|---|---|
//! | `file_size` | blocking | `file_size_bytes`, `file_size_files` |
//! | `system` | blocking | `system_cpu_usage_percent`, `system_memory_used_bytes`, `system_load_average{period}` |
//! | `tcp_probe` | async | `tcp_probe_up`, `tcp_probe_duration_seconds` |
//! | `sleep` | blocking | `sleep_exports_total` |
//!
//! Every series carries an `exporter` label with the qualified exporter name.

pub mod file_size;
pub mod sleep;
pub mod system;
pub mod tcp_probe;

use metronome_framework::PluginRegistry;

/// Register every built-in exporter type.
pub fn register_builtin(plugins: &mut PluginRegistry) {
    plugins
        .register(file_size::EXPORTER_TYPE, file_size::plugin)
        .register(system::EXPORTER_TYPE, system::plugin)
        .register(tcp_probe::EXPORTER_TYPE, tcp_probe::plugin)
        .register(sleep::EXPORTER_TYPE, sleep::plugin);
}
