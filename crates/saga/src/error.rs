//! Saga error types.

use ledger::LedgerError;
use outbox::{OutboxError, PublishError};
use thiserror::Error;

/// Errors that can occur while publishing or dispatching saga events.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No handler is registered for the event type. Permanent: the event
    /// can never be dispatched and is dead-lettered.
    #[error("Unknown event type: {event_type}")]
    UnknownEventType { event_type: String },

    /// The payload does not decode as the event its type claims.
    /// Permanent: redelivering the same bytes cannot help.
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// A handler received an event type it does not work. Permanent:
    /// indicates a mis-wired registry.
    #[error("Handler '{handler}' cannot handle event type '{event_type}'")]
    UnexpectedEvent {
        handler: &'static str,
        event_type: String,
    },

    /// A handler exceeded its deadline; treated as a failure on the
    /// retry path, not a hang.
    #[error("Handler for '{event_type}' timed out after {timeout_ms}ms")]
    HandlerTimeout { event_type: String, timeout_ms: u64 },

    /// Ledger error that is not a business-rule rejection the handler
    /// converts into a compensation event.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Outbox store or bus subscription error.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Bus publish error.
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

impl SagaError {
    /// Returns true if retrying the same delivery can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SagaError::UnknownEventType { .. }
                | SagaError::MalformedPayload(_)
                | SagaError::UnexpectedEvent { .. }
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
