//! Fulfillment service entry point.

use common::CancellationToken;
use service::{Config, Engine, telemetry};
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env();
    telemetry::init_tracing(&config).expect("failed to initialise tracing");

    // 2. Install Prometheus metrics recorder
    telemetry::install_metrics(config.metrics_addr).expect("failed to install Prometheus recorder");

    // 3. Build stores, lock coordinator and pipeline
    let mut engine = Engine::build(config)
        .await
        .expect("failed to build fulfillment engine");

    // 4. Background work
    let shutdown = CancellationToken::new();
    let tasks = engine.start_background(&shutdown);
    tracing::info!("fulfillment service running");

    shutdown_signal().await;
    shutdown.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            tracing::error!(error = %err, "background task failed");
        }
    }

    tracing::info!("service shut down gracefully");
}
