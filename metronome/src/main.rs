//! Metronome: scheduled metric exporters with a Prometheus endpoint.

use anyhow::Result;
use metronome_framework::{RunnerArgs, run_app};

fn main() -> Result<()> {
    // The runtime is built from the config (blocking pool size), so no #[tokio::main].
    run_app(RunnerArgs::parse(), metronome_exporters::register_builtin)
}
