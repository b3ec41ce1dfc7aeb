//! Reserve funds when an order is placed.

use async_trait::async_trait;
use ledger::{FundLedger, LedgerError};

use crate::error::SagaError;
use crate::events::BrokerageEvent;
use crate::order_flow::REASON_INSUFFICIENT_FUNDS;
use crate::registry::SagaHandler;

/// On `OrderPlaced`: move the order's cost from available to reserved.
///
/// An insufficient balance is a normal saga outcome, not an error: the
/// handler emits `FundsReservationFailed` and the orders service reacts
/// by rejecting the order asynchronously.
pub struct ReserveFundsHandler {
    ledger: FundLedger,
}

impl ReserveFundsHandler {
    /// Creates the handler over the service's fund ledger.
    pub fn new(ledger: FundLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl SagaHandler for ReserveFundsHandler {
    fn name(&self) -> &'static str {
        "reserve_funds"
    }

    async fn handle(&self, event: &BrokerageEvent) -> Result<Vec<BrokerageEvent>, SagaError> {
        let BrokerageEvent::OrderPlaced(data) = event else {
            return Err(SagaError::UnexpectedEvent {
                handler: self.name(),
                event_type: event.event_type().to_string(),
            });
        };

        match self.ledger.reserve_funds(data.account_id, data.amount).await {
            Ok(()) => {
                tracing::info!(
                    order_id = %data.order_id,
                    account_id = %data.account_id,
                    amount = %data.amount,
                    "funds reserved"
                );
                Ok(vec![BrokerageEvent::funds_reserved(
                    data.order_id,
                    data.account_id,
                    data.amount,
                )])
            }
            Err(LedgerError::InsufficientFunds { available, .. }) => {
                metrics::counter!("saga_reservations_declined_total").increment(1);
                tracing::info!(
                    order_id = %data.order_id,
                    account_id = %data.account_id,
                    requested = %data.amount,
                    %available,
                    "reservation declined, emitting compensation trigger"
                );
                Ok(vec![BrokerageEvent::funds_reservation_failed(
                    data.order_id,
                    data.account_id,
                    data.amount,
                    REASON_INSUFFICIENT_FUNDS,
                )])
            }
            Err(err) => Err(err.into()),
        }
    }
}
