//! Choreographed saga machinery for the brokerage platform.
//!
//! This crate ties the transactional outbox to the saga step handlers:
//!
//! 1. A local transaction writes a domain record and an outbox row.
//! 2. The [`OutboxPublisher`] ships pending rows to the bus.
//! 3. A remote service's [`EventSubscriber`] receives the event,
//!    deduplicates it, and dispatches it to a registered handler.
//! 4. The handler mutates local state through the fund ledger and emits
//!    follow-up events into its own outbox, continuing the chain.
//!
//! Failures along the way produce compensation events instead of errors:
//! an order whose funds cannot be reserved is rejected asynchronously,
//! and reserved funds are released when an order is rejected downstream.

pub mod deadletter;
pub mod error;
pub mod events;
pub mod handlers;
pub mod order_flow;
pub mod publisher;
pub mod registry;
pub mod subscriber;

pub use deadletter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterSink};
pub use error::SagaError;
pub use events::BrokerageEvent;
pub use handlers::{ReleaseFundsHandler, ReserveFundsHandler, SettleFundsHandler};
pub use publisher::{BatchOutcome, OutboxPublisher, PublisherConfig};
pub use registry::{HandlerRegistry, SagaHandler};
pub use subscriber::{EventSubscriber, SubscriberConfig, SubscriberState};
