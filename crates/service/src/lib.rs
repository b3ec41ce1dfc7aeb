//! Process wiring for the portfolio service.
//!
//! Assembles the fund ledger, the saga handler registry, the event
//! subscriber and the outbox publisher, and ties their lifecycles to the
//! hosting process: the subscriber is started before serving and stopped
//! on shutdown, the publisher loop runs on its poll interval until the
//! shutdown signal fires.

pub mod config;

use std::sync::Arc;

use ledger::FundLedger;
use outbox::{InboundLog, MessageBus, OutboxStore};
use saga::{
    DeadLetterSink, EventSubscriber, HandlerRegistry, OutboxPublisher, ReleaseFundsHandler,
    ReserveFundsHandler, SagaError, SettleFundsHandler,
};
use tokio::sync::watch;

pub use config::Config;

/// Builds the portfolio service's saga dispatch table.
pub fn build_registry(ledger: &FundLedger) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(
        "OrderPlaced",
        Arc::new(ReserveFundsHandler::new(ledger.clone())),
    );
    registry.register(
        "OrderRejected",
        Arc::new(ReleaseFundsHandler::new(ledger.clone())),
    );
    registry.register(
        "OrderFilled",
        Arc::new(SettleFundsHandler::new(ledger.clone())),
    );
    registry
}

/// Runs the service until `shutdown` resolves, then winds down
/// gracefully: the publisher loop is signalled, the subscriber drains
/// its in-flight delivery, both are joined before returning.
pub async fn run<S, L, B>(
    config: Config,
    store: S,
    inbound: L,
    bus: B,
    ledger: FundLedger,
    dead_letters: Arc<dyn DeadLetterSink>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), SagaError>
where
    S: OutboxStore + Clone + 'static,
    L: InboundLog + Clone + 'static,
    B: MessageBus + Clone + 'static,
{
    let subscriber = EventSubscriber::new(
        bus.clone(),
        inbound,
        store.clone(),
        build_registry(&ledger),
        dead_letters,
        config.subscriber_config(),
    );
    subscriber.start().await?;

    let publisher = OutboxPublisher::new(store, bus, config.publisher_config());
    let poll_interval = config.poll_interval();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let publisher_task = tokio::spawn(async move {
        publisher.run(poll_interval, shutdown_rx).await;
    });

    shutdown.await;
    tracing::info!("shutdown requested, draining");

    let _ = shutdown_tx.send(true);
    subscriber.stop().await;
    if publisher_task.await.is_err() {
        tracing::error!("publisher loop panicked");
    }

    tracing::info!("service stopped");
    Ok(())
}
