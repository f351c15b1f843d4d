// SQL exporter binary entry point

use anyhow::{Context, Result};
use common::bootstrap;
use common::config::Settings;
use common::exposition::ExpositionServer;
use common::scheduler::{ShutdownController, Supervisor};
use common::sink::PrometheusSink;
use common::telemetry;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_LOG_FILTER: &str = "exporter=info,common=info";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{:#}", e), "SQL exporter failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<u8> {
    // Load configuration
    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            let _ = telemetry::init_logging(DEFAULT_LOG_FILTER);
            return Err(e).context("Failed to load configuration");
        }
    };
    telemetry::init_logging(&settings.observability.log_level)?;

    info!(
        databases = settings.databases.len(),
        grace_period_seconds = settings.shutdown.grace_period_seconds,
        in_flight = ?settings.shutdown.in_flight,
        "SQL exporter started"
    );

    // Set up graceful shutdown
    let shutdown = ShutdownController::new(settings.shutdown.grace_period());
    shutdown.listen_for_signals();

    // Connect to the databases
    let pools = bootstrap::connect_databases(&settings).await?;

    // Expose the gauge registry
    let sink = Arc::new(PrometheusSink::new());
    let addr = bootstrap::metrics_addr(&settings).context("Invalid server.host")?;
    let server = match ExpositionServer::bind(addr, sink.handle()).await {
        Ok(server) => server,
        Err(e) => {
            bootstrap::close_pools(&pools).await;
            return Err(e).context(format!("Failed to bind metrics endpoint on {}", addr));
        }
    };
    let server_handle = server.spawn(shutdown.token());

    // Launch the queries
    let supervisor = Supervisor::new(sink, settings.shutdown.in_flight);
    let executors = bootstrap::executors(&pools);
    let outcome = supervisor
        .run(settings.query_jobs(), &executors, &shutdown)
        .await;

    shutdown.trigger();
    bootstrap::release_resources(server_handle, &pools, shutdown.grace_period()).await;

    let outcome = outcome?;
    info!(outcome = ?outcome, "SQL exporter shut down");
    Ok(outcome.exit_code())
}
