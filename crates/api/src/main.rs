//! API server entry point.

use std::future::Future;
use std::io;
use std::sync::Arc;

use api::Config;
use inventory::{InMemoryLedger, PostgresLedger, ReservationManager};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Resolves when `signal` fires. A handler that cannot be installed is
/// logged and never resolves, leaving the other signal to stop the server.
async fn wait_for_signal(name: &'static str, signal: impl Future<Output = io::Result<()>>) {
    if let Err(err) = signal.await {
        tracing::error!(signal = name, error = %err, "failed to install signal handler");
        std::future::pending::<()>().await;
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = wait_for_signal("SIGINT", signal::ctrl_c());

    #[cfg(unix)]
    let terminate = wait_for_signal("SIGTERM", async {
        signal::unix::signal(signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        Ok::<(), io::Error>(())
    });

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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Runs the intake, sweeper, and HTTP server until shutdown.
async fn serve(
    reservations: ReservationManager,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let state = api::create_state(reservations, config);

    let (stop_sweeper, sweeper_shutdown) = watch::channel(false);
    let sweeper = tokio::spawn(state.sweeper.clone().run(sweeper_shutdown));

    let app = api::create_app(state.clone(), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, partitions = state.intake.partitions(), "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop producing expiries before draining the partitions they feed.
    let _ = stop_sweeper.send(true);
    if let Err(err) = sweeper.await {
        tracing::error!(error = %err, "expiry sweeper task failed");
    }
    state.intake.shutdown().await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Hand the ledger to the reservation manager and serve
    let reservations = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let ledger = PostgresLedger::new(pool);
            ledger.run_migrations().await?;
            tracing::info!("using PostgreSQL ledger");
            ReservationManager::new(Arc::new(ledger), config.reservation())
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory ledger");
            ReservationManager::new(Arc::new(InMemoryLedger::new()), config.reservation())
        }
    };
    serve(reservations, &config, metrics_handle).await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivered_signal_resolves() {
        tokio::time::timeout(
            Duration::from_secs(1),
            wait_for_signal("TEST", async { Ok(()) }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn failed_handler_waits_instead_of_panicking() {
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            wait_for_signal("TEST", async {
                Err(io::Error::other("signal driver unavailable"))
            }),
        )
        .await;
        assert!(result.is_err());
    }
}
