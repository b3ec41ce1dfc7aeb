//! Transactional outbox primitives for the brokerage saga platform.
//!
//! A service writes an [`OutboxEvent`] row in the same transaction as the
//! business mutation it announces. A relay then ships pending rows to the
//! message bus (at-least-once), and consuming services deduplicate via the
//! [`InboundLog`] before dispatching to their saga handlers.

pub mod bus;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use bus::{Acknowledger, BusSubscription, Delivery, DeliveryStream, InMemoryBus, MessageBus, PublishError};
pub use common::{AggregateId, CorrelationId};
pub use error::{OutboxError, Result};
pub use event::{EventId, OutboxEvent, OutboxEventBuilder, OutboxStatus};
pub use memory::{InMemoryInboundLog, InMemoryOutboxStore};
pub use postgres::{PostgresInboundLog, PostgresOutboxStore};
pub use store::{InboundLog, OutboxStore};
