//! Prometheus exposition for Metronome.
//!
//! Exporters publish into a shared [`MetricsRegistry`]; the [`HttpServer`]
//! renders that registry on every scrape.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │    Exporters    │────>│ MetricsRegistry │────>│   HTTP Server   │
//! │  (scheduled)    │     │ (prom. client)  │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```

pub mod http;
pub mod registry;

pub use http::{DEFAULT_METRICS_PATH, HttpServer};
pub use registry::{
    CounterFamily, GaugeFamily, Labels, MetricsRegistry, SharedRegistry, exporter_labels,
};
