//! Dead-letter path for events that exhaust their retries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox::OutboxEvent;
use tokio::sync::RwLock;

use crate::error::Result;

/// An event removed from the normal retry flow, with the reason it was
/// given up on.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The envelope that could not be processed.
    pub event: OutboxEvent,

    /// Why processing was abandoned.
    pub reason: String,

    /// When the event was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

/// Holding path for events that repeatedly fail processing.
///
/// Pushing here is the operator alert surface; dead-lettered events are
/// handled manually, never retried by the subscriber.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Records an event as dead-lettered.
    async fn push(&self, event: OutboxEvent, reason: &str) -> Result<()>;
}

/// In-memory dead-letter sink for tests and the default wiring.
#[derive(Clone, Default)]
pub struct InMemoryDeadLetterSink {
    entries: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of dead-lettered events.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing has been dead-lettered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Returns a snapshot of the dead-lettered entries.
    pub async fn entries(&self) -> Vec<DeadLetter> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn push(&self, event: OutboxEvent, reason: &str) -> Result<()> {
        self.entries.write().await.push(DeadLetter {
            event,
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }
}
