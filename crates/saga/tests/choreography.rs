//! End-to-end choreography tests: orders service outbox → bus →
//! portfolio service subscriber → handlers → portfolio outbox → bus.
//!
//! The portfolio service is the system under test; the orders service is
//! simulated by enqueueing its events into its own outbox, exactly as
//! its local transactions would.

use std::sync::Arc;
use std::time::Duration;

use common::AggregateId;
use ledger::{AccountId, Currency, FundLedger, Money};
use outbox::{InMemoryBus, InMemoryInboundLog, InMemoryOutboxStore, MessageBus, OutboxStore};
use saga::order_flow::{ORDERS_TOPIC, PORTFOLIO_TOPIC, REASON_INSUFFICIENT_FUNDS};
use saga::{
    BrokerageEvent, EventSubscriber, HandlerRegistry, InMemoryDeadLetterSink, OutboxPublisher,
    PublisherConfig, ReleaseFundsHandler, ReserveFundsHandler, SettleFundsHandler,
    SubscriberConfig,
};

use saga::events::OrderSide;

type TestPublisher = OutboxPublisher<InMemoryOutboxStore, InMemoryBus>;
type TestSubscriber = EventSubscriber<InMemoryBus, InMemoryInboundLog, InMemoryOutboxStore>;

struct TestHarness {
    bus: InMemoryBus,
    ledger: FundLedger,
    account_id: AccountId,
    orders_outbox: InMemoryOutboxStore,
    orders_publisher: TestPublisher,
    portfolio_outbox: InMemoryOutboxStore,
    portfolio_publisher: TestPublisher,
    dead_letters: Arc<InMemoryDeadLetterSink>,
    subscriber: TestSubscriber,
}

impl TestHarness {
    async fn new(opening_cents: i64) -> Self {
        let bus = InMemoryBus::new();
        let ledger = FundLedger::new();
        let account_id = AccountId::new();
        ledger
            .open_portfolio(account_id, Currency::usd(), Money::from_cents(opening_cents))
            .await
            .unwrap();

        // The orders service's side of the choreography.
        let orders_outbox = InMemoryOutboxStore::new();
        let orders_publisher = OutboxPublisher::new(
            orders_outbox.clone(),
            bus.clone(),
            PublisherConfig::for_topic(ORDERS_TOPIC),
        );

        // The portfolio service: subscriber over the orders topic,
        // follow-ups land in its own outbox, published to its own topic.
        let portfolio_outbox = InMemoryOutboxStore::new();
        let portfolio_publisher = OutboxPublisher::new(
            portfolio_outbox.clone(),
            bus.clone(),
            PublisherConfig::for_topic(PORTFOLIO_TOPIC),
        );

        let mut registry = HandlerRegistry::new();
        registry.register(
            "OrderPlaced",
            Arc::new(ReserveFundsHandler::new(ledger.clone())),
        );
        registry.register(
            "OrderRejected",
            Arc::new(ReleaseFundsHandler::new(ledger.clone())),
        );
        registry.register(
            "OrderFilled",
            Arc::new(SettleFundsHandler::new(ledger.clone())),
        );

        let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
        let subscriber = EventSubscriber::new(
            bus.clone(),
            InMemoryInboundLog::new(),
            portfolio_outbox.clone(),
            registry,
            dead_letters.clone(),
            SubscriberConfig::for_topic(ORDERS_TOPIC),
        );
        subscriber.start().await.unwrap();

        Self {
            bus,
            ledger,
            account_id,
            orders_outbox,
            orders_publisher,
            portfolio_outbox,
            portfolio_publisher,
            dead_letters,
            subscriber,
        }
    }

    /// The orders service's local transaction: stage an event in its
    /// outbox.
    async fn orders_service_emits(&self, event: &BrokerageEvent) {
        self.orders_outbox
            .enqueue(vec![event.to_envelope().unwrap()])
            .await
            .unwrap();
    }

    async fn place_order(&self, cents: i64) -> AggregateId {
        let order_id = AggregateId::new();
        self.orders_service_emits(&BrokerageEvent::order_placed(
            order_id,
            self.account_id,
            "ACME",
            OrderSide::Buy,
            10,
            Money::from_cents(cents),
        ))
        .await;
        order_id
    }

    async fn balances(&self) -> (Money, Money) {
        self.ledger.balances(self.account_id).await.unwrap()
    }

    /// Waits until the portfolio outbox holds `count` follow-up events.
    async fn await_follow_ups(&self, count: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while self.portfolio_outbox.event_count().await < count {
            if std::time::Instant::now() > deadline {
                panic!(
                    "expected {count} follow-ups, got {}",
                    self.portfolio_outbox.event_count().await
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Published event types on the portfolio topic, in order.
    fn portfolio_topic_types(&self) -> Vec<String> {
        self.bus
            .published_events(PORTFOLIO_TOPIC)
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

#[tokio::test]
async fn order_placement_reserves_funds_and_publishes_confirmation() {
    let harness = TestHarness::new(1000).await;

    harness.place_order(400).await;
    harness.orders_publisher.publish_batch().await.unwrap();

    harness.await_follow_ups(1).await;
    assert_eq!(
        harness.balances().await,
        (Money::from_cents(600), Money::from_cents(400))
    );

    harness.portfolio_publisher.publish_batch().await.unwrap();
    assert_eq!(harness.portfolio_topic_types(), vec!["FundsReserved"]);
    assert!(harness.dead_letters.is_empty().await);

    harness.subscriber.stop().await;
}

#[tokio::test]
async fn insufficient_funds_becomes_a_compensation_event_not_an_error() {
    let harness = TestHarness::new(100).await;

    harness.place_order(500).await;
    harness.orders_publisher.publish_batch().await.unwrap();

    harness.await_follow_ups(1).await;
    // Balances untouched.
    assert_eq!(
        harness.balances().await,
        (Money::from_cents(100), Money::zero())
    );

    harness.portfolio_publisher.publish_batch().await.unwrap();
    let published = harness.bus.published_events(PORTFOLIO_TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event_type, "FundsReservationFailed");
    assert_eq!(
        published[0].payload["reason"],
        serde_json::json!(REASON_INSUFFICIENT_FUNDS)
    );
    assert!(harness.dead_letters.is_empty().await);

    harness.subscriber.stop().await;
}

#[tokio::test]
async fn downstream_rejection_releases_reserved_funds() {
    let harness = TestHarness::new(1000).await;

    // Step 1: place and reserve.
    let order_id = harness.place_order(400).await;
    harness.orders_publisher.publish_batch().await.unwrap();
    harness.await_follow_ups(1).await;
    assert_eq!(
        harness.balances().await,
        (Money::from_cents(600), Money::from_cents(400))
    );

    // Step 2: the venue rejects the working order; the orders service
    // emits the compensation trigger.
    harness
        .orders_service_emits(&BrokerageEvent::order_rejected(
            order_id,
            harness.account_id,
            Money::from_cents(400),
            "venue rejected",
        ))
        .await;
    harness.orders_publisher.publish_batch().await.unwrap();

    harness.await_follow_ups(2).await;
    assert_eq!(
        harness.balances().await,
        (Money::from_cents(1000), Money::zero()),
        "reserve then release restores the prior balances exactly"
    );

    harness.portfolio_publisher.publish_batch().await.unwrap();
    assert_eq!(
        harness.portfolio_topic_types(),
        vec!["FundsReserved", "FundsReleased"]
    );

    harness.subscriber.stop().await;
}

#[tokio::test]
async fn fill_settles_the_reserved_cost() {
    let harness = TestHarness::new(1000).await;

    let order_id = harness.place_order(400).await;
    harness.orders_publisher.publish_batch().await.unwrap();
    harness.await_follow_ups(1).await;

    harness
        .orders_service_emits(&BrokerageEvent::order_filled(
            order_id,
            harness.account_id,
            Money::from_cents(400),
        ))
        .await;
    harness.orders_publisher.publish_batch().await.unwrap();

    harness.await_follow_ups(2).await;
    assert_eq!(
        harness.balances().await,
        (Money::from_cents(600), Money::zero()),
        "settled funds left the portfolio"
    );

    harness.portfolio_publisher.publish_batch().await.unwrap();
    assert_eq!(
        harness.portfolio_topic_types(),
        vec!["FundsReserved", "FundsSettled"]
    );

    harness.subscriber.stop().await;
}

#[tokio::test]
async fn whole_chain_shares_the_order_correlation_id() {
    let harness = TestHarness::new(1000).await;

    let order_id = harness.place_order(400).await;
    harness.orders_publisher.publish_batch().await.unwrap();
    harness.await_follow_ups(1).await;

    let chain = harness
        .portfolio_outbox
        .events_for_correlation(order_id.into())
        .await
        .unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].event_type, "FundsReserved");
    assert_eq!(chain[0].correlation_id.as_uuid(), order_id.as_uuid());

    harness.subscriber.stop().await;
}

#[tokio::test]
async fn publisher_resend_is_deduplicated_by_the_subscriber() {
    let harness = TestHarness::new(1000).await;

    let order_id = harness.place_order(400).await;

    // The envelope reaches the bus, but the publisher crashes before
    // marking the row; the next batch resends the same event id.
    let pending = harness
        .orders_outbox
        .events_for_correlation(order_id.into())
        .await
        .unwrap();
    harness
        .bus
        .publish(ORDERS_TOPIC, &pending[0])
        .await
        .unwrap();
    harness.orders_publisher.publish_batch().await.unwrap();
    assert_eq!(harness.bus.published_count(ORDERS_TOPIC), 2);

    harness.await_follow_ups(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Exactly one state mutation and one follow-up emission.
    assert_eq!(
        harness.balances().await,
        (Money::from_cents(600), Money::from_cents(400))
    );
    assert_eq!(harness.portfolio_outbox.event_count().await, 1);

    harness.subscriber.stop().await;
}

#[tokio::test]
async fn foreign_event_type_is_dead_lettered() {
    let harness = TestHarness::new(1000).await;

    let mut envelope = BrokerageEvent::order_placed(
        AggregateId::new(),
        harness.account_id,
        "ACME",
        OrderSide::Buy,
        1,
        Money::from_cents(100),
    )
    .to_envelope()
    .unwrap();
    envelope.event_type = "DividendDeclared".to_string();

    harness.orders_outbox.enqueue(vec![envelope]).await.unwrap();
    harness.orders_publisher.publish_batch().await.unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while harness.dead_letters.is_empty().await {
        assert!(
            std::time::Instant::now() < deadline,
            "expected a dead-lettered event"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let entries = harness.dead_letters.entries().await;
    assert!(entries[0].reason.contains("DividendDeclared"));
    assert_eq!(
        harness.balances().await,
        (Money::from_cents(1000), Money::zero())
    );

    harness.subscriber.stop().await;
}
