// Ingest daemon:
// - Load configuration and set up logging
// - Start the Prometheus exporter when METRICS_ADDR is set
// - Open (and migrate) the database
// - Read upstream observations as JSON lines from stdin into the ingest pipeline
// - Run cluster maintenance in the background until stdin closes or Ctrl-C

use banking_stage_store::{
    config::Config,
    ingest::{BatchConfig, IngestPipeline},
    models::ObservationEvent,
    state::AppState,
    store::maintenance,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting banking-stage-store");

    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        init_metrics_exporter(addr)?;
        info!("Serving metrics on http://{}/metrics", addr);
    }

    let state = AppState::init(config).await?;
    info!("Database ready at {}", state.config.database_url);

    let shutdown = CancellationToken::new();

    let maintenance_state = state.clone();
    let maintenance_shutdown = shutdown.clone();
    let maintenance_handle = tokio::spawn(async move {
        maintenance::run_maintenance(maintenance_state, maintenance_shutdown).await;
    });

    let pipeline = IngestPipeline::spawn(
        state.writer.clone(),
        BatchConfig::from_config(&state.config),
        shutdown.clone(),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut received = 0u64;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ObservationEvent>(&line) {
                            Ok(event) => {
                                if pipeline.send(event).await.is_err() {
                                    error!("Ingest pipeline stopped accepting events");
                                    break;
                                }
                                received += 1;
                            }
                            Err(e) => warn!("Skipping malformed observation: {}", e),
                        }
                    }
                    Ok(None) => {
                        info!("Input closed after {} observations", received);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    // drain buffered observations before stopping maintenance
    pipeline.close().await;
    shutdown.cancel();
    let _ = maintenance_handle.await;

    info!("Shutdown complete");
    Ok(())
}

/// Starts an HTTP listener that serves the Prometheus exposition format.
fn init_metrics_exporter(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))?;
    Ok(())
}
