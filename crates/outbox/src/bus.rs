use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_core::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{OutboxError, OutboxEvent, Result};

/// Errors returned by a publish attempt, split by whether retrying can
/// ever help.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The bus could not be reached or timed out; retried with backoff.
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// The bus rejected the event itself (e.g. malformed payload);
    /// retrying the same bytes cannot succeed.
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

impl PublishError {
    /// Returns true if retrying this failure is pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(self, PublishError::Permanent(_))
    }
}

/// A single delivery of an event to a subscriber.
///
/// `attempt` counts deliveries of this event on this subscription,
/// starting at 1; it grows on every negative acknowledgment.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The delivered event.
    pub event: OutboxEvent,

    /// Which delivery attempt this is (1-based).
    pub attempt: u32,
}

/// A stream of deliveries.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Settles deliveries: acknowledge to remove from flow, negative-
/// acknowledge to trigger redelivery with an incremented attempt count.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledges the delivery; the bus will not deliver it again.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Rejects the delivery; the bus redelivers it with `attempt + 1`.
    async fn nack(&self, delivery: &Delivery) -> Result<()>;
}

/// An open subscription to a bus topic.
pub struct BusSubscription {
    /// Deliveries, in per-topic publication order.
    pub deliveries: DeliveryStream,

    /// Handle for settling deliveries pulled from this subscription.
    pub acker: Arc<dyn Acknowledger>,
}

/// Capability contract for the message bus: at-least-once delivery with
/// per-topic ordering and ack/nack settlement. The wire protocol behind
/// it is out of scope.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes an event to a topic.
    ///
    /// Returning `Ok` means the bus has acknowledged and durably accepted
    /// the event; the caller may mark it published.
    async fn publish(
        &self,
        topic: &str,
        event: &OutboxEvent,
    ) -> std::result::Result<(), PublishError>;

    /// Opens a subscription to a topic.
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription>;
}

#[derive(Default)]
struct TopicState {
    subscribers: Vec<mpsc::UnboundedSender<Delivery>>,
    journal: Vec<OutboxEvent>,
}

/// In-memory message bus for tests and the default single-process wiring.
///
/// Preserves publication order per topic, supports redelivery via nack,
/// and can be told to fail publishes to exercise the retry paths.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    topics: Arc<RwLock<HashMap<String, TopicState>>>,
    fail_transient: Arc<AtomicU32>,
    fail_permanent: Arc<AtomicBool>,
}

impl InMemoryBus {
    /// Creates a new in-memory bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` publish calls fail with a transient error.
    pub fn fail_next_publishes(&self, n: u32) {
        self.fail_transient.store(n, Ordering::SeqCst);
    }

    /// Makes every publish fail permanently until cleared.
    pub fn set_fail_permanent(&self, fail: bool) {
        self.fail_permanent.store(fail, Ordering::SeqCst);
    }

    /// Returns every event published to `topic`, in order.
    pub fn published_events(&self, topic: &str) -> Vec<OutboxEvent> {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .map(|t| t.journal.clone())
            .unwrap_or_default()
    }

    /// Returns how many events have been published to `topic`.
    pub fn published_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .map(|t| t.journal.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(
        &self,
        topic: &str,
        event: &OutboxEvent,
    ) -> std::result::Result<(), PublishError> {
        if self.fail_permanent.load(Ordering::SeqCst) {
            return Err(PublishError::Permanent("payload rejected by bus".into()));
        }

        let remaining = self.fail_transient.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_transient.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::Transient("bus unreachable".into()));
        }

        let mut topics = self.topics.write().unwrap();
        let state = topics.entry(topic.to_string()).or_default();
        state.journal.push(event.clone());
        state.subscribers.retain(|tx| {
            tx.send(Delivery {
                event: event.clone(),
                attempt: 1,
            })
            .is_ok()
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut topics = self.topics.write().unwrap();
            let state = topics.entry(topic.to_string()).or_default();
            state.subscribers.push(tx.clone());
        }

        let deliveries: DeliveryStream =
            Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|delivery| (delivery, rx))
            }));

        let acker = Arc::new(InMemoryAcker {
            topic: topic.to_string(),
            requeue: tx,
        });

        Ok(BusSubscription { deliveries, acker })
    }
}

struct InMemoryAcker {
    topic: String,
    requeue: mpsc::UnboundedSender<Delivery>,
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self, _delivery: &Delivery) -> Result<()> {
        // Deliveries are removed from the channel when pulled; nothing to do.
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        self.requeue
            .send(Delivery {
                event: delivery.event.clone(),
                attempt: delivery.attempt + 1,
            })
            .map_err(|_| OutboxError::SubscriptionClosed(self.topic.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AggregateId;
    use futures_util::StreamExt;

    fn make_event(event_type: &str) -> OutboxEvent {
        let aggregate_id = AggregateId::new();
        OutboxEvent::builder()
            .event_type(event_type)
            .aggregate_id(aggregate_id)
            .correlation_id(aggregate_id.into())
            .payload_raw(serde_json::json!({}))
            .build()
    }

    #[tokio::test]
    async fn publish_delivers_to_subscriber_in_order() {
        let bus = InMemoryBus::new();
        let mut subscription = bus.subscribe("orders.events").await.unwrap();

        bus.publish("orders.events", &make_event("First"))
            .await
            .unwrap();
        bus.publish("orders.events", &make_event("Second"))
            .await
            .unwrap();

        let first = subscription.deliveries.next().await.unwrap();
        let second = subscription.deliveries.next().await.unwrap();
        assert_eq!(first.event.event_type, "First");
        assert_eq!(second.event.event_type, "Second");
        assert_eq!(first.attempt, 1);
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempt() {
        let bus = InMemoryBus::new();
        let mut subscription = bus.subscribe("orders.events").await.unwrap();

        bus.publish("orders.events", &make_event("OrderPlaced"))
            .await
            .unwrap();

        let delivery = subscription.deliveries.next().await.unwrap();
        subscription.acker.nack(&delivery).await.unwrap();

        let redelivery = subscription.deliveries.next().await.unwrap();
        assert_eq!(redelivery.event.event_id, delivery.event.event_id);
        assert_eq!(redelivery.attempt, 2);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InMemoryBus::new();
        let mut orders = bus.subscribe("orders.events").await.unwrap();
        let _portfolio = bus.subscribe("portfolio.events").await.unwrap();

        bus.publish("orders.events", &make_event("OrderPlaced"))
            .await
            .unwrap();

        assert_eq!(bus.published_count("orders.events"), 1);
        assert_eq!(bus.published_count("portfolio.events"), 0);
        assert!(orders.deliveries.next().await.is_some());
    }

    #[tokio::test]
    async fn transient_failures_are_consumed() {
        let bus = InMemoryBus::new();
        bus.fail_next_publishes(1);

        let event = make_event("OrderPlaced");
        let err = bus.publish("orders.events", &event).await.unwrap_err();
        assert!(!err.is_permanent());

        bus.publish("orders.events", &event).await.unwrap();
        assert_eq!(bus.published_count("orders.events"), 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_flagged() {
        let bus = InMemoryBus::new();
        bus.set_fail_permanent(true);

        let err = bus
            .publish("orders.events", &make_event("OrderPlaced"))
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
