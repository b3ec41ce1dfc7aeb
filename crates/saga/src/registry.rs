//! Event-type to handler dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SagaError;
use crate::events::BrokerageEvent;

/// A saga step: business logic run in response to one event type.
///
/// Handlers mutate local state (through the fund ledger) and return the
/// follow-up events to enqueue in the local outbox. Business-rule
/// rejections are encoded as returned compensation events; an `Err` is an
/// infrastructure failure and lands on the retry path. Idempotency under
/// redelivery is guaranteed by the subscriber's dedup check, not by the
/// handler.
#[async_trait]
pub trait SagaHandler: Send + Sync {
    /// Returns the handler name, for logs and failure reports.
    fn name(&self) -> &'static str;

    /// Processes one event, returning zero-or-more follow-up events.
    async fn handle(&self, event: &BrokerageEvent) -> Result<Vec<BrokerageEvent>, SagaError>;
}

/// Maps event type names to their handlers.
///
/// Event types without a registered handler are rejected as permanent
/// failures by the subscriber, never silently ignored.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn SagaHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event type, replacing any previous one.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn SagaHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Returns the handler for an event type, if registered.
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn SagaHandler>> {
        self.handlers.get(event_type).cloned()
    }

    /// Returns true if a handler is registered for the event type.
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Returns the registered event type names.
    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl SagaHandler for NoopHandler {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn handle(
            &self,
            _event: &BrokerageEvent,
        ) -> Result<Vec<BrokerageEvent>, SagaError> {
            Ok(vec![])
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        assert_eq!(registry.handler_count(), 0);
        assert!(!registry.handles("OrderPlaced"));

        registry.register("OrderPlaced", Arc::new(NoopHandler));
        assert!(registry.handles("OrderPlaced"));
        assert!(registry.get("OrderPlaced").is_some());
        assert!(registry.get("OrderFilled").is_none());
        assert_eq!(registry.handler_count(), 1);
    }

    #[test]
    fn register_replaces_existing_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("OrderPlaced", Arc::new(NoopHandler));
        registry.register("OrderPlaced", Arc::new(NoopHandler));
        assert_eq!(registry.handler_count(), 1);
    }
}
