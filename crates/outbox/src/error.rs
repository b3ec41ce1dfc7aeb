use thiserror::Error;

use crate::EventId;

/// Errors that can occur when interacting with the outbox store, the
/// inbound log or a bus subscription.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The referenced event does not exist in the store.
    #[error("Outbox event not found: {0}")]
    EventNotFound(EventId),

    /// An attempt was made to mutate a row already in a terminal state.
    ///
    /// `published_at` is immutable once set; the publisher treats this as
    /// a skip, not a failure.
    #[error("Outbox event {event_id} is already {status}")]
    AlreadyTerminal { event_id: EventId, status: String },

    /// The bus subscription was closed underneath the consumer.
    #[error("Bus subscription closed for topic '{0}'")]
    SubscriptionClosed(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
