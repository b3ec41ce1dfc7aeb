//! The outbox publisher: ships pending rows to the bus.

use std::time::Duration;

use chrono::Utc;
use outbox::{MessageBus, OutboxStore};
use tokio::sync::watch;

use crate::error::Result;

/// Publisher tuning knobs.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Topic this service's outbox is published to.
    pub topic: String,

    /// Maximum rows shipped per batch.
    pub batch_size: usize,

    /// Delivery attempts before a row is marked `Failed` and alerted.
    pub max_attempts: u32,

    /// Backoff after the first failed attempt; doubles per attempt.
    pub base_backoff: Duration,

    /// Ceiling for the per-row backoff.
    pub max_backoff: Duration,
}

impl PublisherConfig {
    /// Creates a config for a topic with default tuning.
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            batch_size: 50,
            max_attempts: 8,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Outcome counts of one `publish_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows acknowledged by the bus and marked published.
    pub published: usize,

    /// Rows left pending for a later attempt.
    pub retried: usize,

    /// Rows moved to the terminal `Failed` state.
    pub failed: usize,
}

/// Polls the outbox store and publishes due rows to the message bus.
///
/// Safe to invoke repeatedly and concurrently: the batch is selected
/// from pending rows only, already-published rows are never re-sent by
/// the store, and the publish-then-mark ordering guarantees
/// at-least-once delivery (a crash between bus-send and mark-published
/// resends the row on the next batch; consumers deduplicate).
pub struct OutboxPublisher<S, B>
where
    S: OutboxStore,
    B: MessageBus,
{
    store: S,
    bus: B,
    config: PublisherConfig,
}

impl<S, B> OutboxPublisher<S, B>
where
    S: OutboxStore,
    B: MessageBus,
{
    /// Creates a new publisher over a store and a bus.
    pub fn new(store: S, bus: B, config: PublisherConfig) -> Self {
        Self { store, bus, config }
    }

    /// Publishes one bounded batch of due rows, oldest first.
    #[tracing::instrument(skip(self), fields(topic = %self.config.topic))]
    pub async fn publish_batch(&self) -> Result<BatchOutcome> {
        let batch_start = std::time::Instant::now();
        let batch = self
            .store
            .fetch_due(self.config.batch_size, Utc::now())
            .await?;

        let mut outcome = BatchOutcome::default();
        for event in batch {
            match self.bus.publish(&self.config.topic, &event).await {
                Ok(()) => {
                    // Publish-then-mark: the row only leaves Pending once
                    // the bus has acknowledged it.
                    self.store
                        .mark_published(event.event_id, Utc::now())
                        .await?;
                    metrics::counter!("outbox_published_total").increment(1);
                    outcome.published += 1;
                }
                Err(err) if err.is_permanent() => {
                    self.store
                        .mark_failed(event.event_id, &err.to_string())
                        .await?;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    tracing::error!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        error = %err,
                        "outbox event rejected by bus, giving up"
                    );
                    outcome.failed += 1;
                }
                Err(err) => {
                    let attempts = event.attempt_count + 1;
                    if attempts >= self.config.max_attempts {
                        self.store
                            .mark_failed(event.event_id, &err.to_string())
                            .await?;
                        metrics::counter!("outbox_publish_failures_total").increment(1);
                        tracing::error!(
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            attempts,
                            error = %err,
                            "outbox event exhausted delivery attempts"
                        );
                        outcome.failed += 1;
                    } else {
                        let next_attempt_at = Utc::now() + self.backoff(attempts);
                        self.store
                            .mark_retry(event.event_id, attempts, next_attempt_at, &err.to_string())
                            .await?;
                        tracing::warn!(
                            event_id = %event.event_id,
                            attempts,
                            error = %err,
                            "outbox publish failed, will retry"
                        );
                        outcome.retried += 1;
                    }
                }
            }
        }

        metrics::histogram!("outbox_publish_batch_seconds")
            .record(batch_start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Drives `publish_batch` on a periodic trigger until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.publish_batch().await {
                        tracing::error!(error = %err, "outbox publish batch failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(topic = %self.config.topic, "outbox publisher stopped");
    }

    fn backoff(&self, attempt: u32) -> chrono::Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.config.max_backoff);
        chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::seconds(300))
    }
}
