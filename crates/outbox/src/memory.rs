use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    CorrelationId, EventId, OutboxError, OutboxEvent, OutboxStatus, Result,
    store::{InboundLog, OutboxStore},
};

/// In-memory outbox store used by tests and the default wiring.
///
/// Provides the same interface and lifecycle rules as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    events: Arc<RwLock<Vec<OutboxEvent>>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty in-memory outbox store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of rows in the store.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Returns the number of rows with the given status.
    pub async fn count_with_status(&self, status: OutboxStatus) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.status == status)
            .count()
    }

    /// Clears all rows.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, events: Vec<OutboxEvent>) -> Result<()> {
        metrics::counter!("outbox_enqueued_total").increment(events.len() as u64);
        self.events.write().await.extend(events);
        Ok(())
    }

    async fn fetch_due(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxEvent>> {
        let events = self.events.read().await;
        let mut due: Vec<_> = events
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending && e.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_published(&self, event_id: EventId, published_at: DateTime<Utc>) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.event_id == event_id)
            .ok_or(OutboxError::EventNotFound(event_id))?;

        // published_at is write-once
        if event.status == OutboxStatus::Published {
            return Ok(());
        }

        event.status = OutboxStatus::Published;
        event.published_at = Some(published_at);
        event.last_error = None;
        Ok(())
    }

    async fn mark_retry(
        &self,
        event_id: EventId,
        attempt_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.event_id == event_id)
            .ok_or(OutboxError::EventNotFound(event_id))?;

        if event.status.is_terminal() {
            return Err(OutboxError::AlreadyTerminal {
                event_id,
                status: event.status.to_string(),
            });
        }

        event.attempt_count = attempt_count;
        event.next_attempt_at = next_attempt_at;
        event.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_failed(&self, event_id: EventId, error: &str) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.event_id == event_id)
            .ok_or(OutboxError::EventNotFound(event_id))?;

        if event.status == OutboxStatus::Published {
            return Err(OutboxError::AlreadyTerminal {
                event_id,
                status: event.status.to_string(),
            });
        }

        event.status = OutboxStatus::Failed;
        event.last_error = Some(error.to_string());
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<OutboxEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().find(|e| e.event_id == event_id).cloned())
    }

    async fn events_for_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<OutboxEvent>> {
        let events = self.events.read().await;
        let mut chain: Vec<_> = events
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect();
        chain.sort_by_key(|e| e.created_at);
        Ok(chain)
    }
}

/// In-memory inbound dedup log.
#[derive(Clone, Default)]
pub struct InMemoryInboundLog {
    consumed: Arc<RwLock<HashMap<EventId, DateTime<Utc>>>>,
}

impl InMemoryInboundLog {
    /// Creates a new empty inbound log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of consumed events recorded.
    pub async fn consumed_count(&self) -> usize {
        self.consumed.read().await.len()
    }
}

#[async_trait]
impl InboundLog for InMemoryInboundLog {
    async fn record_consumed(
        &self,
        event_id: EventId,
        consumed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut consumed = self.consumed.write().await;
        if consumed.contains_key(&event_id) {
            return Ok(false);
        }
        consumed.insert(event_id, consumed_at);
        Ok(true)
    }

    async fn is_consumed(&self, event_id: EventId) -> Result<bool> {
        Ok(self.consumed.read().await.contains_key(&event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AggregateId;
    use chrono::Duration;

    fn make_event(event_type: &str) -> OutboxEvent {
        let aggregate_id = AggregateId::new();
        OutboxEvent::builder()
            .event_type(event_type)
            .aggregate_id(aggregate_id)
            .correlation_id(aggregate_id.into())
            .payload_raw(serde_json::json!({"test": true}))
            .build()
    }

    #[tokio::test]
    async fn fetch_due_returns_oldest_first() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();

        let mut newer = make_event("B");
        newer.created_at = now;
        newer.next_attempt_at = now;
        let mut older = make_event("A");
        older.created_at = now - Duration::seconds(10);
        older.next_attempt_at = older.created_at;

        store.enqueue(vec![newer, older]).await.unwrap();

        let due = store.fetch_due(10, now).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].event_type, "A");
        assert_eq!(due[1].event_type, "B");
    }

    #[tokio::test]
    async fn fetch_due_respects_limit_and_backoff() {
        let store = InMemoryOutboxStore::new();

        let a = make_event("A");
        let b = make_event("B");
        let mut deferred = make_event("Deferred");
        let now = Utc::now();
        deferred.next_attempt_at = now + Duration::seconds(30);
        store.enqueue(vec![a, b, deferred]).await.unwrap();

        let due = store.fetch_due(1, now).await.unwrap();
        assert_eq!(due.len(), 1);

        let due = store.fetch_due(10, now).await.unwrap();
        assert_eq!(due.len(), 2, "deferred row must not be due yet");
    }

    #[tokio::test]
    async fn mark_published_is_write_once() {
        let store = InMemoryOutboxStore::new();
        let event = make_event("OrderPlaced");
        let event_id = event.event_id;
        store.enqueue(vec![event]).await.unwrap();

        let first = Utc::now();
        store.mark_published(event_id, first).await.unwrap();

        // Second mark is a no-op; published_at keeps its original value.
        store
            .mark_published(event_id, first + Duration::seconds(5))
            .await
            .unwrap();

        let stored = store.get_event(event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Published);
        assert_eq!(stored.published_at, Some(first));
    }

    #[tokio::test]
    async fn published_rows_are_not_fetched() {
        let store = InMemoryOutboxStore::new();
        let event = make_event("OrderPlaced");
        let event_id = event.event_id;
        store.enqueue(vec![event]).await.unwrap();

        store.mark_published(event_id, Utc::now()).await.unwrap();
        let due = store.fetch_due(10, Utc::now()).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn mark_retry_updates_attempts_and_deadline() {
        let store = InMemoryOutboxStore::new();
        let event = make_event("OrderPlaced");
        let event_id = event.event_id;
        store.enqueue(vec![event]).await.unwrap();

        let next = Utc::now() + Duration::seconds(4);
        store
            .mark_retry(event_id, 2, next, "bus unreachable")
            .await
            .unwrap();

        let stored = store.get_event(event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.attempt_count, 2);
        assert_eq!(stored.next_attempt_at, next);
        assert_eq!(stored.last_error.as_deref(), Some("bus unreachable"));
    }

    #[tokio::test]
    async fn mark_failed_is_terminal() {
        let store = InMemoryOutboxStore::new();
        let event = make_event("OrderPlaced");
        let event_id = event.event_id;
        store.enqueue(vec![event]).await.unwrap();

        store.mark_failed(event_id, "malformed payload").await.unwrap();

        let stored = store.get_event(event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);

        let result = store
            .mark_retry(event_id, 1, Utc::now(), "should not happen")
            .await;
        assert!(matches!(result, Err(OutboxError::AlreadyTerminal { .. })));
    }

    #[tokio::test]
    async fn events_for_correlation_returns_chain_in_order() {
        let store = InMemoryOutboxStore::new();
        let correlation = CorrelationId::new();
        let now = Utc::now();

        let mut first = make_event("OrderPlaced");
        first.correlation_id = correlation;
        first.created_at = now - Duration::seconds(5);
        let mut second = make_event("FundsReserved");
        second.correlation_id = correlation;
        second.created_at = now;

        store.enqueue(vec![second, first]).await.unwrap();
        store.enqueue(vec![make_event("Unrelated")]).await.unwrap();

        let chain = store.events_for_correlation(correlation).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].event_type, "OrderPlaced");
        assert_eq!(chain[1].event_type, "FundsReserved");
    }

    #[tokio::test]
    async fn inbound_log_records_each_event_once() {
        let log = InMemoryInboundLog::new();
        let event_id = EventId::new();

        assert!(!log.is_consumed(event_id).await.unwrap());
        assert!(log.record_consumed(event_id, Utc::now()).await.unwrap());
        assert!(log.is_consumed(event_id).await.unwrap());
        assert!(!log.record_consumed(event_id, Utc::now()).await.unwrap());
        assert_eq!(log.consumed_count().await, 1);
    }
}
