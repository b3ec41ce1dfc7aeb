//! The event vocabulary of the order saga.

use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId};
use ledger::{AccountId, Money};
use outbox::OutboxEvent;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order; placement reserves its cost.
    Buy,
    /// Sell order.
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

/// Events exchanged between the orders and portfolio services.
///
/// Every event of one saga chain shares the order's ID as its
/// correlation ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BrokerageEvent {
    /// An order was accepted by the orders service; its cost must be
    /// reserved.
    OrderPlaced(OrderPlacedData),

    /// Funds were moved from available to reserved for an order.
    FundsReserved(FundsReservedData),

    /// The reservation was declined; triggers compensation downstream.
    FundsReservationFailed(FundsReservationFailedData),

    /// The orders service rejected the order; reserved funds must be
    /// released.
    OrderRejected(OrderRejectedData),

    /// Reserved funds were returned to the available balance.
    FundsReleased(FundsReleasedData),

    /// The order executed; the reserved cost must be settled.
    OrderFilled(OrderFilledData),

    /// The reserved cost left the portfolio on settlement.
    FundsSettled(FundsSettledData),
}

/// Data for OrderPlaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    /// The order being worked.
    pub order_id: AggregateId,
    /// The account placing the order.
    pub account_id: AccountId,
    /// Instrument symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Number of units.
    pub quantity: u32,
    /// Total cost to reserve, fees included.
    pub amount: Money,
    /// When the order was placed.
    pub placed_at: DateTime<Utc>,
}

/// Data for FundsReserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundsReservedData {
    /// The order the reservation is for.
    pub order_id: AggregateId,
    /// The account whose funds were reserved.
    pub account_id: AccountId,
    /// Amount moved from available to reserved.
    pub amount: Money,
    /// When the reservation happened.
    pub reserved_at: DateTime<Utc>,
}

/// Data for FundsReservationFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundsReservationFailedData {
    /// The order whose reservation was declined.
    pub order_id: AggregateId,
    /// The account the reservation was attempted on.
    pub account_id: AccountId,
    /// The amount that was requested.
    pub amount: Money,
    /// Machine-readable reason, e.g. "insufficient_funds".
    pub reason: String,
    /// When the reservation was declined.
    pub failed_at: DateTime<Utc>,
}

/// Data for OrderRejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRejectedData {
    /// The rejected order.
    pub order_id: AggregateId,
    /// The account that placed it.
    pub account_id: AccountId,
    /// Amount reserved for the order, to be released.
    pub amount: Money,
    /// Why the order was rejected.
    pub reason: String,
    /// When the rejection happened.
    pub rejected_at: DateTime<Utc>,
}

/// Data for FundsReleased.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundsReleasedData {
    /// The order the funds were reserved for.
    pub order_id: AggregateId,
    /// The account whose funds were released.
    pub account_id: AccountId,
    /// Amount moved back from reserved to available.
    pub amount: Money,
    /// When the release happened.
    pub released_at: DateTime<Utc>,
}

/// Data for OrderFilled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFilledData {
    /// The executed order.
    pub order_id: AggregateId,
    /// The account that placed it.
    pub account_id: AccountId,
    /// Execution cost to settle from the reserved balance.
    pub amount: Money,
    /// When the fill happened.
    pub filled_at: DateTime<Utc>,
}

/// Data for FundsSettled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundsSettledData {
    /// The settled order.
    pub order_id: AggregateId,
    /// The account the cost was settled against.
    pub account_id: AccountId,
    /// Amount consumed from the reserved balance.
    pub amount: Money,
    /// When settlement happened.
    pub settled_at: DateTime<Utc>,
}

impl BrokerageEvent {
    /// Returns the event type name used on the wire and in the registry.
    pub fn event_type(&self) -> &'static str {
        match self {
            BrokerageEvent::OrderPlaced(_) => "OrderPlaced",
            BrokerageEvent::FundsReserved(_) => "FundsReserved",
            BrokerageEvent::FundsReservationFailed(_) => "FundsReservationFailed",
            BrokerageEvent::OrderRejected(_) => "OrderRejected",
            BrokerageEvent::FundsReleased(_) => "FundsReleased",
            BrokerageEvent::OrderFilled(_) => "OrderFilled",
            BrokerageEvent::FundsSettled(_) => "FundsSettled",
        }
    }

    /// Returns the order ID, the correlation key of the saga chain.
    pub fn order_id(&self) -> AggregateId {
        match self {
            BrokerageEvent::OrderPlaced(d) => d.order_id,
            BrokerageEvent::FundsReserved(d) => d.order_id,
            BrokerageEvent::FundsReservationFailed(d) => d.order_id,
            BrokerageEvent::OrderRejected(d) => d.order_id,
            BrokerageEvent::FundsReleased(d) => d.order_id,
            BrokerageEvent::OrderFilled(d) => d.order_id,
            BrokerageEvent::FundsSettled(d) => d.order_id,
        }
    }

    /// Returns the aggregate the event is about: the order for order
    /// lifecycle events, the account's portfolio for fund movements.
    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            BrokerageEvent::OrderPlaced(d) => d.order_id,
            BrokerageEvent::OrderRejected(d) => d.order_id,
            BrokerageEvent::OrderFilled(d) => d.order_id,
            BrokerageEvent::FundsReserved(d) => AggregateId::from_uuid(d.account_id.as_uuid()),
            BrokerageEvent::FundsReservationFailed(d) => {
                AggregateId::from_uuid(d.account_id.as_uuid())
            }
            BrokerageEvent::FundsReleased(d) => AggregateId::from_uuid(d.account_id.as_uuid()),
            BrokerageEvent::FundsSettled(d) => AggregateId::from_uuid(d.account_id.as_uuid()),
        }
    }

    /// Returns the correlation ID shared by the whole saga chain.
    pub fn correlation_id(&self) -> CorrelationId {
        self.order_id().into()
    }

    /// Returns when the business fact occurred.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BrokerageEvent::OrderPlaced(d) => d.placed_at,
            BrokerageEvent::FundsReserved(d) => d.reserved_at,
            BrokerageEvent::FundsReservationFailed(d) => d.failed_at,
            BrokerageEvent::OrderRejected(d) => d.rejected_at,
            BrokerageEvent::FundsReleased(d) => d.released_at,
            BrokerageEvent::OrderFilled(d) => d.filled_at,
            BrokerageEvent::FundsSettled(d) => d.settled_at,
        }
    }

    /// Wraps the event into an outbox row ready for enqueueing.
    pub fn to_envelope(&self) -> Result<OutboxEvent, serde_json::Error> {
        let payload = match self {
            BrokerageEvent::OrderPlaced(d) => serde_json::to_value(d)?,
            BrokerageEvent::FundsReserved(d) => serde_json::to_value(d)?,
            BrokerageEvent::FundsReservationFailed(d) => serde_json::to_value(d)?,
            BrokerageEvent::OrderRejected(d) => serde_json::to_value(d)?,
            BrokerageEvent::FundsReleased(d) => serde_json::to_value(d)?,
            BrokerageEvent::OrderFilled(d) => serde_json::to_value(d)?,
            BrokerageEvent::FundsSettled(d) => serde_json::to_value(d)?,
        };

        Ok(OutboxEvent::builder()
            .event_type(self.event_type())
            .aggregate_id(self.aggregate_id())
            .correlation_id(self.correlation_id())
            .occurred_at(self.occurred_at())
            .payload_raw(payload)
            .build())
    }

    /// Decodes an outbox row back into an event.
    ///
    /// An unrecognized `event_type` is a permanent failure: the row can
    /// never be dispatched and belongs on the dead-letter path.
    pub fn from_envelope(envelope: &OutboxEvent) -> Result<Self, SagaError> {
        let payload = envelope.payload.clone();
        let event = match envelope.event_type.as_str() {
            "OrderPlaced" => BrokerageEvent::OrderPlaced(serde_json::from_value(payload)?),
            "FundsReserved" => BrokerageEvent::FundsReserved(serde_json::from_value(payload)?),
            "FundsReservationFailed" => {
                BrokerageEvent::FundsReservationFailed(serde_json::from_value(payload)?)
            }
            "OrderRejected" => BrokerageEvent::OrderRejected(serde_json::from_value(payload)?),
            "FundsReleased" => BrokerageEvent::FundsReleased(serde_json::from_value(payload)?),
            "OrderFilled" => BrokerageEvent::OrderFilled(serde_json::from_value(payload)?),
            "FundsSettled" => BrokerageEvent::FundsSettled(serde_json::from_value(payload)?),
            other => {
                return Err(SagaError::UnknownEventType {
                    event_type: other.to_string(),
                });
            }
        };
        Ok(event)
    }
}

// Convenience constructors
impl BrokerageEvent {
    /// Creates an OrderPlaced event.
    pub fn order_placed(
        order_id: AggregateId,
        account_id: AccountId,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: u32,
        amount: Money,
    ) -> Self {
        BrokerageEvent::OrderPlaced(OrderPlacedData {
            order_id,
            account_id,
            symbol: symbol.into(),
            side,
            quantity,
            amount,
            placed_at: Utc::now(),
        })
    }

    /// Creates a FundsReserved event.
    pub fn funds_reserved(order_id: AggregateId, account_id: AccountId, amount: Money) -> Self {
        BrokerageEvent::FundsReserved(FundsReservedData {
            order_id,
            account_id,
            amount,
            reserved_at: Utc::now(),
        })
    }

    /// Creates a FundsReservationFailed event.
    pub fn funds_reservation_failed(
        order_id: AggregateId,
        account_id: AccountId,
        amount: Money,
        reason: impl Into<String>,
    ) -> Self {
        BrokerageEvent::FundsReservationFailed(FundsReservationFailedData {
            order_id,
            account_id,
            amount,
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }

    /// Creates an OrderRejected event.
    pub fn order_rejected(
        order_id: AggregateId,
        account_id: AccountId,
        amount: Money,
        reason: impl Into<String>,
    ) -> Self {
        BrokerageEvent::OrderRejected(OrderRejectedData {
            order_id,
            account_id,
            amount,
            reason: reason.into(),
            rejected_at: Utc::now(),
        })
    }

    /// Creates a FundsReleased event.
    pub fn funds_released(order_id: AggregateId, account_id: AccountId, amount: Money) -> Self {
        BrokerageEvent::FundsReleased(FundsReleasedData {
            order_id,
            account_id,
            amount,
            released_at: Utc::now(),
        })
    }

    /// Creates an OrderFilled event.
    pub fn order_filled(order_id: AggregateId, account_id: AccountId, amount: Money) -> Self {
        BrokerageEvent::OrderFilled(OrderFilledData {
            order_id,
            account_id,
            amount,
            filled_at: Utc::now(),
        })
    }

    /// Creates a FundsSettled event.
    pub fn funds_settled(order_id: AggregateId, account_id: AccountId, amount: Money) -> Self {
        BrokerageEvent::FundsSettled(FundsSettledData {
            order_id,
            account_id,
            amount,
            settled_at: Utc::now(),
        })
    }
}
