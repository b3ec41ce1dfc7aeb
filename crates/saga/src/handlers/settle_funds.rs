//! Settle reserved funds when an order fills.

use async_trait::async_trait;
use ledger::FundLedger;

use crate::error::SagaError;
use crate::events::BrokerageEvent;
use crate::registry::SagaHandler;

/// On `OrderFilled`: consume the order's reserved cost - the funds leave
/// the portfolio on settlement.
///
/// Unlike a declined reservation, a settlement that cannot find its
/// reserved funds is a ledger inconsistency; the error propagates to the
/// retry path and ends on the dead-letter alert surface.
pub struct SettleFundsHandler {
    ledger: FundLedger,
}

impl SettleFundsHandler {
    /// Creates the handler over the service's fund ledger.
    pub fn new(ledger: FundLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl SagaHandler for SettleFundsHandler {
    fn name(&self) -> &'static str {
        "settle_funds"
    }

    async fn handle(&self, event: &BrokerageEvent) -> Result<Vec<BrokerageEvent>, SagaError> {
        let BrokerageEvent::OrderFilled(data) = event else {
            return Err(SagaError::UnexpectedEvent {
                handler: self.name(),
                event_type: event.event_type().to_string(),
            });
        };

        self.ledger.settle_funds(data.account_id, data.amount).await?;

        tracing::info!(
            order_id = %data.order_id,
            account_id = %data.account_id,
            amount = %data.amount,
            "reserved funds settled"
        );
        Ok(vec![BrokerageEvent::funds_settled(
            data.order_id,
            data.account_id,
            data.amount,
        )])
    }
}
