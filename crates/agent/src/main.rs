//! Autonomic agent - self-monitoring and self-healing daemon
//!
//! Samples host resources, analyzes trends, runs the healing loop and serves
//! read-only state over HTTP.

use anyhow::Result;
use autonomic_lib::{gateway::SystemProbe, AutonomicSystem};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting autonomic-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        api_port = config.api_port,
        sample_interval_secs = config.sample_interval_secs,
        healing_interval_secs = config.healing_interval_secs,
        "Agent configured"
    );

    // Probes get 503 rather than connection refused while the system is built
    let app_state = Arc::new(api::AppState::uninitialized());
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state.clone()));

    let gateway = Arc::new(SystemProbe::new());
    let system = Arc::new(AutonomicSystem::new(
        gateway,
        config.autonomic(),
        config.node_name.clone(),
    )?);
    app_state.install(system.clone());

    system.start().await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            system.stop("SIGINT received").await;
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => info!("API server exited"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
            system.stop("API server exited").await;
        }
    }

    info!("Shutdown complete");
    Ok(())
}
