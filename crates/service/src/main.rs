//! Portfolio service entry point.

use std::sync::Arc;

use ledger::FundLedger;
use outbox::{InMemoryBus, InMemoryInboundLog, InMemoryOutboxStore, PostgresInboundLog, PostgresOutboxStore};
use saga::InMemoryDeadLetterSink;
use service::Config;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

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
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Load configuration once; nothing below reads the environment.
    let config = Config::from_env();
    tracing::info!(
        subscribe_topic = %config.subscribe_topic,
        publish_topic = %config.publish_topic,
        "starting portfolio service"
    );

    // 4. Assemble collaborators and run until a signal arrives.
    let bus = InMemoryBus::new();
    let ledger = FundLedger::new();
    let dead_letters = Arc::new(InMemoryDeadLetterSink::new());

    match config.database_url.clone() {
        Some(database_url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .expect("failed to connect to database");

            let store = PostgresOutboxStore::new(pool.clone());
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            let inbound = PostgresInboundLog::new(pool);

            service::run(
                config,
                store,
                inbound,
                bus,
                ledger,
                dead_letters,
                shutdown_signal(),
            )
            .await
            .expect("service error");
        }
        None => {
            service::run(
                config,
                InMemoryOutboxStore::new(),
                InMemoryInboundLog::new(),
                bus,
                ledger,
                dead_letters,
                shutdown_signal(),
            )
            .await
            .expect("service error");
        }
    }

    tracing::info!("portfolio service shut down gracefully");
}
