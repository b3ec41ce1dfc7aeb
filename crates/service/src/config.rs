//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::{PublisherConfig, SubscriberConfig};

/// Service configuration with sensible defaults.
///
/// Built exactly once at process start and threaded through the
/// constructors; core logic never reads the environment itself.
///
/// Reads from environment variables:
/// - `DATABASE_URL` — PostgreSQL outbox storage (default: in-memory)
/// - `SUBSCRIBE_TOPIC` — topic consumed from (default: `"orders.events"`)
/// - `PUBLISH_TOPIC` — topic this outbox publishes to (default: `"portfolio.events"`)
/// - `OUTBOX_POLL_INTERVAL_MS` — publisher trigger period (default: `200`)
/// - `OUTBOX_BATCH_SIZE` — rows per publish batch (default: `50`)
/// - `OUTBOX_MAX_ATTEMPTS` — delivery attempts before a row fails (default: `8`)
/// - `SUBSCRIBER_MAX_DELIVERIES` — deliveries before dead-lettering (default: `5`)
/// - `HANDLER_TIMEOUT_MS` — saga handler deadline (default: `5000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub subscribe_topic: String,
    pub publish_topic: String,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub max_publish_attempts: u32,
    pub max_deliveries: u32,
    pub handler_timeout_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            subscribe_topic: std::env::var("SUBSCRIBE_TOPIC")
                .unwrap_or(defaults.subscribe_topic),
            publish_topic: std::env::var("PUBLISH_TOPIC").unwrap_or(defaults.publish_topic),
            poll_interval_ms: env_parse("OUTBOX_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            batch_size: env_parse("OUTBOX_BATCH_SIZE", defaults.batch_size),
            max_publish_attempts: env_parse("OUTBOX_MAX_ATTEMPTS", defaults.max_publish_attempts),
            max_deliveries: env_parse("SUBSCRIBER_MAX_DELIVERIES", defaults.max_deliveries),
            handler_timeout_ms: env_parse("HANDLER_TIMEOUT_MS", defaults.handler_timeout_ms),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Returns the publisher trigger period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Builds the publisher config for this service's outbox.
    pub fn publisher_config(&self) -> PublisherConfig {
        let mut config = PublisherConfig::for_topic(self.publish_topic.clone());
        config.batch_size = self.batch_size;
        config.max_attempts = self.max_publish_attempts;
        config
    }

    /// Builds the subscriber config for the consumed topic.
    pub fn subscriber_config(&self) -> SubscriberConfig {
        let mut config = SubscriberConfig::for_topic(self.subscribe_topic.clone());
        config.max_deliveries = self.max_deliveries;
        config.handler_timeout = Duration::from_millis(self.handler_timeout_ms);
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            subscribe_topic: saga::order_flow::ORDERS_TOPIC.to_string(),
            publish_topic: saga::order_flow::PORTFOLIO_TOPIC.to_string(),
            poll_interval_ms: 200,
            batch_size: 50,
            max_publish_attempts: 8,
            max_deliveries: 5,
            handler_timeout_ms: 5000,
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
