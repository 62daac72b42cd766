//! BusJobs CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Load configuration** from defaults, the file named by `BUSJOBS_CONFIG`
//!    and `BUSJOBS__*` environment variables, and validate it.
//! 2. **Wire observability**: a `tracing-subscriber` JSON or pretty layer, plus
//!    an OpenTelemetry OTLP exporter when an endpoint is configured. All spans
//!    and events emitted by the workspace crates flow through here.
//! 3. **Run the job host**: register the configured functions against the
//!    in-memory broker, start their listeners, replay the seed file if one is
//!    configured, and on Ctrl-C stop every listener with draining.

mod error;
mod host;
mod observability;
mod settings;

use anyhow::Context;
use listener::InMemoryMessagingProvider;
use tracing::info;

use crate::host::JobHost;
use crate::settings::HostConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HostConfig::load().context("Failed to load configuration")?;
    let telemetry = observability::init(&config.log, &config.telemetry)
        .context("Failed to initialise observability")?;

    let result = run(config).await;
    telemetry.shutdown();
    result
}

async fn run(config: HostConfig) -> anyhow::Result<()> {
    let mut host = JobHost::new(&config, InMemoryMessagingProvider::new())
        .context("Failed to register functions")?;

    for (function, descriptor) in host.descriptors() {
        let descriptor =
            serde_json::to_string(&descriptor).context("Failed to serialize descriptor")?;
        info!(function = %function, %descriptor, "Function registered");
    }

    host.start().await.context("Failed to start listeners")?;

    if let Some(path) = &config.replay.file {
        if let Err(error) = host.replay(path).await {
            host.stop().await;
            return Err(error).context("Failed to replay seed file");
        }
    }

    info!(
        listeners = host.listeners().count(),
        "Job host running; press Ctrl-C to stop"
    );
    let signal = tokio::signal::ctrl_c().await;
    info!("Shutdown requested");
    host.stop().await;
    signal.context("Failed to listen for Ctrl-C")
}
