//! The long-lived event subscriber: receives cross-service events and
//! dispatches them to saga handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use outbox::{
    Acknowledger, BusSubscription, Delivery, InboundLog, MessageBus, OutboxEvent, OutboxStore,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;

use crate::deadletter::DeadLetterSink;
use crate::error::{Result, SagaError};
use crate::events::BrokerageEvent;
use crate::registry::HandlerRegistry;

/// The lifecycle state of a subscriber.
///
/// State transitions:
/// ```text
/// Stopped ──► Starting ──► Running ──► Stopping ──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SubscriberState {
    /// Not listening; resources released.
    #[default]
    Stopped,

    /// Subscription being established.
    Starting,

    /// Dispatch loop pulling and handling deliveries.
    Running,

    /// Draining: the in-flight delivery finishes, no new ones are pulled.
    Stopping,
}

impl SubscriberState {
    /// Returns true if `start()` may establish a new subscription.
    pub fn can_start(&self) -> bool {
        matches!(self, SubscriberState::Stopped)
    }

    /// Returns true if `stop()` has anything to wind down.
    pub fn can_stop(&self) -> bool {
        matches!(self, SubscriberState::Running)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberState::Stopped => "Stopped",
            SubscriberState::Starting => "Starting",
            SubscriberState::Running => "Running",
            SubscriberState::Stopping => "Stopping",
        }
    }
}

impl std::fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscriber tuning knobs.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Topic to subscribe to (another service's outbox topic).
    pub topic: String,

    /// Deliveries of one event before it is dead-lettered.
    pub max_deliveries: u32,

    /// Deadline for a single handler invocation; exceeding it is a
    /// failure on the retry path, not a hang.
    pub handler_timeout: Duration,
}

impl SubscriberConfig {
    /// Creates a config for a topic with default tuning.
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            max_deliveries: 5,
            handler_timeout: Duration::from_secs(5),
        }
    }
}

/// Listens on a bus topic and drives the saga forward.
///
/// Per delivery: deduplicate against the inbound log, dispatch to the
/// registered handler, enqueue the handler's follow-up events into the
/// local outbox, record consumption, acknowledge. Handler failures are
/// negatively acknowledged for redelivery up to `max_deliveries`, then
/// dead-lettered. Deliveries are processed one at a time, preserving the
/// bus's per-topic ordering.
pub struct EventSubscriber<B, L, S>
where
    B: MessageBus + Clone + 'static,
    L: InboundLog + Clone + 'static,
    S: OutboxStore + Clone + 'static,
{
    bus: B,
    inbound: L,
    outbox: S,
    registry: Arc<HandlerRegistry>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: SubscriberConfig,
    state: Arc<RwLock<SubscriberState>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<B, L, S> EventSubscriber<B, L, S>
where
    B: MessageBus + Clone + 'static,
    L: InboundLog + Clone + 'static,
    S: OutboxStore + Clone + 'static,
{
    /// Creates a subscriber; call [`start`](Self::start) to begin
    /// listening.
    pub fn new(
        bus: B,
        inbound: L,
        outbox: S,
        registry: HandlerRegistry,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: SubscriberConfig,
    ) -> Self {
        Self {
            bus,
            inbound,
            outbox,
            registry: Arc::new(registry),
            dead_letters,
            config,
            state: Arc::new(RwLock::new(SubscriberState::Stopped)),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> SubscriberState {
        *self.state.read().await
    }

    /// Establishes the bus subscription and spawns the dispatch loop.
    ///
    /// Idempotent: calling `start` on a starting or running subscriber
    /// is a no-op.
    #[tracing::instrument(skip(self), fields(topic = %self.config.topic))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.can_start() {
                tracing::debug!(state = %state, "subscriber already started");
                return Ok(());
            }
            *state = SubscriberState::Starting;
        }

        let subscription = match self.bus.subscribe(&self.config.topic).await {
            Ok(subscription) => subscription,
            Err(err) => {
                *self.state.write().await = SubscriberState::Stopped;
                return Err(err.into());
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::dispatch_loop(
            subscription,
            self.inbound.clone(),
            self.outbox.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.dead_letters),
            self.config.clone(),
            shutdown_rx,
        ));

        *self.shutdown.lock().await = Some(shutdown_tx);
        *self.task.lock().await = Some(handle);
        *self.state.write().await = SubscriberState::Running;

        tracing::info!("event subscriber started");
        Ok(())
    }

    /// Signals graceful shutdown and waits for the dispatch loop to
    /// finish.
    ///
    /// The in-flight dedup-check-then-handle sequence is allowed to
    /// complete; no new deliveries are pulled afterwards.
    #[tracing::instrument(skip(self), fields(topic = %self.config.topic))]
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if !state.can_stop() {
                tracing::debug!(state = %state, "subscriber not running");
                return;
            }
            *state = SubscriberState::Stopping;
        }

        if let Some(shutdown_tx) = self.shutdown.lock().await.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.task.lock().await.take()
            && handle.await.is_err()
        {
            tracing::error!("subscriber dispatch loop panicked");
        }

        *self.state.write().await = SubscriberState::Stopped;
        tracing::info!("event subscriber stopped");
    }

    async fn dispatch_loop(
        subscription: BusSubscription,
        inbound: L,
        outbox: S,
        registry: Arc<HandlerRegistry>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: SubscriberConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let BusSubscription {
            mut deliveries,
            acker,
        } = subscription;

        loop {
            // The select races only the *pull*; once a delivery is in
            // hand, the full dedup-then-handle sequence runs to
            // completion before shutdown is observed again.
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                maybe_delivery = deliveries.next() => {
                    let Some(delivery) = maybe_delivery else {
                        tracing::warn!("bus subscription closed, stopping dispatch loop");
                        break;
                    };
                    if let Err(err) = Self::handle_delivery(
                        &delivery,
                        &inbound,
                        &outbox,
                        &registry,
                        &dead_letters,
                        &config,
                        acker.as_ref(),
                    )
                    .await
                    {
                        tracing::error!(
                            event_id = %delivery.event.event_id,
                            error = %err,
                            "delivery settlement failed"
                        );
                    }
                }
            }
        }
    }

    async fn handle_delivery(
        delivery: &Delivery,
        inbound: &L,
        outbox: &S,
        registry: &HandlerRegistry,
        dead_letters: &Arc<dyn DeadLetterSink>,
        config: &SubscriberConfig,
        acker: &dyn Acknowledger,
    ) -> Result<()> {
        let envelope = &delivery.event;
        let dispatch_start = std::time::Instant::now();

        // Unknown event types are permanent failures, never silently
        // ignored.
        let Some(handler) = registry.get(&envelope.event_type) else {
            return Self::dead_letter(
                envelope,
                &SagaError::UnknownEventType {
                    event_type: envelope.event_type.clone(),
                },
                dead_letters,
                acker,
                delivery,
            )
            .await;
        };

        let event = match BrokerageEvent::from_envelope(envelope) {
            Ok(event) => event,
            Err(err) => {
                return Self::dead_letter(envelope, &err, dead_letters, acker, delivery).await;
            }
        };

        // Dedup: a replayed event id is a no-op skip, not an error.
        if inbound.is_consumed(envelope.event_id).await? {
            metrics::counter!("subscriber_duplicates_total").increment(1);
            tracing::debug!(event_id = %envelope.event_id, "duplicate event skipped");
            acker.ack(delivery).await?;
            return Ok(());
        }

        let outcome =
            tokio::time::timeout(config.handler_timeout, handler.handle(&event)).await;

        match outcome {
            Ok(Ok(follow_ups)) => {
                let envelopes = follow_ups
                    .iter()
                    .map(BrokerageEvent::to_envelope)
                    .collect::<std::result::Result<Vec<OutboxEvent>, _>>()?;
                if !envelopes.is_empty() {
                    outbox.enqueue(envelopes).await?;
                }
                inbound.record_consumed(envelope.event_id, Utc::now()).await?;
                acker.ack(delivery).await?;

                metrics::counter!("subscriber_events_dispatched_total").increment(1);
                metrics::histogram!("subscriber_dispatch_seconds")
                    .record(dispatch_start.elapsed().as_secs_f64());
                tracing::info!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    handler = handler.name(),
                    follow_ups = follow_ups.len(),
                    "event dispatched"
                );
                Ok(())
            }
            Ok(Err(err)) if err.is_permanent() => {
                Self::dead_letter(envelope, &err, dead_letters, acker, delivery).await
            }
            Ok(Err(err)) => {
                Self::retry_or_dead_letter(envelope, &err, dead_letters, acker, delivery, config)
                    .await
            }
            Err(_elapsed) => {
                let err = SagaError::HandlerTimeout {
                    event_type: envelope.event_type.clone(),
                    timeout_ms: config.handler_timeout.as_millis() as u64,
                };
                Self::retry_or_dead_letter(envelope, &err, dead_letters, acker, delivery, config)
                    .await
            }
        }
    }

    /// Handler failed on a retryable path: redeliver until the ceiling,
    /// then dead-letter.
    async fn retry_or_dead_letter(
        envelope: &OutboxEvent,
        err: &SagaError,
        dead_letters: &Arc<dyn DeadLetterSink>,
        acker: &dyn Acknowledger,
        delivery: &Delivery,
        config: &SubscriberConfig,
    ) -> Result<()> {
        if delivery.attempt >= config.max_deliveries {
            return Self::dead_letter(envelope, err, dead_letters, acker, delivery).await;
        }

        tracing::warn!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            attempt = delivery.attempt,
            error = %err,
            "handler failed, requesting redelivery"
        );
        acker.nack(delivery).await?;
        Ok(())
    }

    /// Removes the event from the retry flow and alerts.
    async fn dead_letter(
        envelope: &OutboxEvent,
        err: &SagaError,
        dead_letters: &Arc<dyn DeadLetterSink>,
        acker: &dyn Acknowledger,
        delivery: &Delivery,
    ) -> Result<()> {
        metrics::counter!("subscriber_dead_lettered_total").increment(1);
        tracing::error!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            attempt = delivery.attempt,
            error = %err,
            "event dead-lettered"
        );
        dead_letters
            .push(envelope.clone(), &err.to_string())
            .await?;
        acker.ack(delivery).await?;
        Ok(())
    }
}
