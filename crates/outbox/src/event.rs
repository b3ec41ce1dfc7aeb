use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AggregateId, CorrelationId};

/// Unique identifier for an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Delivery lifecycle of an outbox row.
///
/// ```text
/// Pending ──┬──► Published   (bus acknowledged, published_at set)
///           └──► Failed      (attempts exhausted or payload rejected)
/// ```
///
/// Only the publisher moves a row out of `Pending`. `Published` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutboxStatus {
    /// Waiting for the publisher to ship it to the bus.
    #[default]
    Pending,

    /// Acknowledged by the bus (terminal state).
    Published,

    /// Given up on after exhausting retries (terminal state, alerted).
    Failed,
}

impl OutboxStatus {
    /// Returns true if the publisher may still attempt delivery.
    pub fn is_deliverable(&self) -> bool {
        matches!(self, OutboxStatus::Pending)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Failed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "Pending",
            OutboxStatus::Published => "Published",
            OutboxStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(OutboxStatus::Pending),
            "Published" => Ok(OutboxStatus::Published),
            "Failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// A domain event staged for publication, tied to the business transaction
/// that produced it.
///
/// Rows are inserted in the same transaction as the business mutation they
/// announce and are never updated by anything other than the publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique identifier for this event, also the downstream dedup key.
    pub event_id: EventId,

    /// The type of the event (e.g., "OrderPlaced", "FundsReserved").
    pub event_type: String,

    /// The aggregate this event is about.
    pub aggregate_id: AggregateId,

    /// The saga chain this event belongs to.
    pub correlation_id: CorrelationId,

    /// When the business fact occurred.
    pub occurred_at: DateTime<Utc>,

    /// When the row was written.
    pub created_at: DateTime<Utc>,

    /// When the bus acknowledged the event. Set exactly once, together
    /// with the transition to `Published`, and immutable afterwards.
    pub published_at: Option<DateTime<Utc>>,

    /// Delivery lifecycle state.
    pub status: OutboxStatus,

    /// Number of delivery attempts made so far.
    pub attempt_count: u32,

    /// Earliest time the publisher may attempt (or re-attempt) delivery.
    pub next_attempt_at: DateTime<Utc>,

    /// Message of the most recent delivery failure, if any.
    pub last_error: Option<String>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,
}

impl OutboxEvent {
    /// Creates a new outbox event builder.
    pub fn builder() -> OutboxEventBuilder {
        OutboxEventBuilder::default()
    }
}

/// Builder for constructing outbox events.
#[derive(Debug, Default)]
pub struct OutboxEventBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    correlation_id: Option<CorrelationId>,
    occurred_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
}

impl OutboxEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Sets when the business fact occurred. Defaults to now.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Sets the row creation time. Defaults to now.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(
        mut self,
        payload: &T,
    ) -> std::result::Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the outbox event.
    ///
    /// New events start `Pending` with zero attempts, immediately due for
    /// delivery.
    ///
    /// # Panics
    ///
    /// Panics if required fields (event_type, aggregate_id, correlation_id,
    /// payload) are not set.
    pub fn build(self) -> OutboxEvent {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        OutboxEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            aggregate_id: self.aggregate_id.expect("aggregate_id is required"),
            correlation_id: self.correlation_id.expect("correlation_id is required"),
            occurred_at: self.occurred_at.unwrap_or(created_at),
            created_at,
            published_at: None,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            next_attempt_at: created_at,
            last_error: None,
            payload: self.payload.expect("payload is required"),
        }
    }

    /// Tries to build the outbox event, returning None if required fields
    /// are missing.
    pub fn try_build(self) -> Option<OutboxEvent> {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Some(OutboxEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type?,
            aggregate_id: self.aggregate_id?,
            correlation_id: self.correlation_id?,
            occurred_at: self.occurred_at.unwrap_or(created_at),
            created_at,
            published_at: None,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            next_attempt_at: created_at,
            last_error: None,
            payload: self.payload?,
        })
    }
}
