//! Release reserved funds when an order is rejected downstream.

use async_trait::async_trait;
use ledger::{FundLedger, LedgerError};

use crate::error::SagaError;
use crate::events::BrokerageEvent;
use crate::registry::SagaHandler;

/// On `OrderRejected`: return the order's reserved cost to the available
/// balance - the compensation step unwinding an earlier reservation.
///
/// An over-release means the funds are not reserved (anymore) for this
/// order; the unwind has nothing left to do, so it completes without
/// emitting, rather than failing the compensation chain.
pub struct ReleaseFundsHandler {
    ledger: FundLedger,
}

impl ReleaseFundsHandler {
    /// Creates the handler over the service's fund ledger.
    pub fn new(ledger: FundLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl SagaHandler for ReleaseFundsHandler {
    fn name(&self) -> &'static str {
        "release_funds"
    }

    async fn handle(&self, event: &BrokerageEvent) -> Result<Vec<BrokerageEvent>, SagaError> {
        let BrokerageEvent::OrderRejected(data) = event else {
            return Err(SagaError::UnexpectedEvent {
                handler: self.name(),
                event_type: event.event_type().to_string(),
            });
        };

        match self.ledger.release_funds(data.account_id, data.amount).await {
            Ok(()) => {
                tracing::info!(
                    order_id = %data.order_id,
                    account_id = %data.account_id,
                    amount = %data.amount,
                    reason = %data.reason,
                    "reserved funds released"
                );
                Ok(vec![BrokerageEvent::funds_released(
                    data.order_id,
                    data.account_id,
                    data.amount,
                )])
            }
            Err(LedgerError::OverRelease { reserved, .. }) => {
                metrics::counter!("saga_over_releases_total").increment(1);
                tracing::warn!(
                    order_id = %data.order_id,
                    account_id = %data.account_id,
                    requested = %data.amount,
                    %reserved,
                    "nothing reserved to release"
                );
                Ok(vec![])
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use ledger::{AccountId, Currency, Money};

    async fn reserved_ledger(account_id: AccountId, cents: i64, reserved: i64) -> FundLedger {
        let ledger = FundLedger::new();
        ledger
            .open_portfolio(account_id, Currency::usd(), Money::from_cents(cents))
            .await
            .unwrap();
        if reserved > 0 {
            ledger
                .reserve_funds(account_id, Money::from_cents(reserved))
                .await
                .unwrap();
        }
        ledger
    }

    fn rejected(account_id: AccountId, cents: i64) -> BrokerageEvent {
        BrokerageEvent::order_rejected(
            AggregateId::new(),
            account_id,
            Money::from_cents(cents),
            "venue rejected",
        )
    }

    #[tokio::test]
    async fn releases_and_emits_funds_released() {
        let account_id = AccountId::new();
        let ledger = reserved_ledger(account_id, 1000, 400).await;
        let handler = ReleaseFundsHandler::new(ledger.clone());

        let follow_ups = handler.handle(&rejected(account_id, 400)).await.unwrap();

        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].event_type(), "FundsReleased");
        assert_eq!(
            ledger.balances(account_id).await.unwrap(),
            (Money::from_cents(1000), Money::zero())
        );
    }

    #[tokio::test]
    async fn over_release_completes_without_emitting() {
        let account_id = AccountId::new();
        let ledger = reserved_ledger(account_id, 1000, 0).await;
        let handler = ReleaseFundsHandler::new(ledger.clone());

        let follow_ups = handler.handle(&rejected(account_id, 400)).await.unwrap();

        assert!(follow_ups.is_empty());
        assert_eq!(
            ledger.balances(account_id).await.unwrap(),
            (Money::from_cents(1000), Money::zero()),
            "balances unchanged"
        );
    }

    #[tokio::test]
    async fn missing_portfolio_is_an_error() {
        let handler = ReleaseFundsHandler::new(FundLedger::new());
        let result = handler.handle(&rejected(AccountId::new(), 100)).await;
        assert!(matches!(result, Err(SagaError::Ledger(_))));
    }
}
