use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{CorrelationId, EventId, OutboxEvent, Result};

/// Durable storage for a service's outbox rows.
///
/// All implementations must be thread-safe (Send + Sync). The intended
/// write path is: the business transaction inserts its rows via
/// [`enqueue`](OutboxStore::enqueue) (or the store's transactional variant
/// where one exists), and only the publisher calls the `mark_*` methods
/// afterwards.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts pending events into the store.
    ///
    /// Events are inserted atomically - either all land or none do.
    async fn enqueue(&self, events: Vec<OutboxEvent>) -> Result<()>;

    /// Returns up to `limit` pending events due for a delivery attempt at
    /// `now`, ordered by `created_at` (oldest first).
    ///
    /// Ordering oldest-first keeps delivery fair and preserves causal
    /// order within an aggregate. Rows whose `next_attempt_at` lies in the
    /// future are skipped; published and failed rows are never returned.
    async fn fetch_due(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxEvent>>;

    /// Marks an event as published, recording the acknowledgment time.
    ///
    /// Once published, `published_at` is immutable: marking an
    /// already-published row again is a no-op.
    async fn mark_published(&self, event_id: EventId, published_at: DateTime<Utc>) -> Result<()>;

    /// Records a failed delivery attempt, leaving the row pending.
    ///
    /// The publisher supplies the new attempt count and the earliest time
    /// of the next attempt (its backoff decision).
    async fn mark_retry(
        &self,
        event_id: EventId,
        attempt_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    /// Moves an event to the terminal `Failed` state.
    ///
    /// Failed rows are the operator's alert surface; they are never
    /// retried by the publisher.
    async fn mark_failed(&self, event_id: EventId, error: &str) -> Result<()>;

    /// Retrieves a single event by ID.
    async fn get_event(&self, event_id: EventId) -> Result<Option<OutboxEvent>>;

    /// Retrieves every event of one saga chain, oldest first.
    async fn events_for_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<OutboxEvent>>;
}

/// Per-service record of consumed inbound events.
///
/// Consulting the log before dispatch and recording after a successful
/// handler run makes redelivered events a no-op skip instead of a double
/// state mutation.
#[async_trait]
pub trait InboundLog: Send + Sync {
    /// Records `event_id` as consumed.
    ///
    /// Returns `true` if this call recorded it, `false` if it was already
    /// present (uniqueness on `event_id`).
    async fn record_consumed(&self, event_id: EventId, consumed_at: DateTime<Utc>)
    -> Result<bool>;

    /// Returns true if `event_id` has already been consumed.
    async fn is_consumed(&self, event_id: EventId) -> Result<bool>;
}
