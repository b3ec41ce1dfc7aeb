//! The fund ledger service: serialized access to portfolios.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::LedgerError;
use crate::money::{Currency, Money};
use crate::portfolio::{AccountId, Portfolio, PortfolioId};

/// Serialized gateway to every portfolio in the service.
///
/// Each portfolio sits behind its own `Mutex`, so concurrent operations
/// on one portfolio serialize (two racing reservations can never both
/// pass the balance check) while operations on distinct portfolios run
/// concurrently.
#[derive(Clone, Default)]
pub struct FundLedger {
    portfolios: Arc<RwLock<HashMap<AccountId, Arc<Mutex<Portfolio>>>>>,
}

impl FundLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a portfolio for an account with an opening balance.
    ///
    /// Each account has at most one portfolio.
    #[tracing::instrument(skip(self))]
    pub async fn open_portfolio(
        &self,
        account_id: AccountId,
        currency: Currency,
        opening_balance: Money,
    ) -> Result<PortfolioId, LedgerError> {
        let mut portfolios = self.portfolios.write().await;
        if portfolios.contains_key(&account_id) {
            return Err(LedgerError::DuplicatePortfolio(account_id));
        }

        let portfolio = Portfolio::open(account_id, currency, opening_balance)?;
        let id = portfolio.id();
        portfolios.insert(account_id, Arc::new(Mutex::new(portfolio)));

        tracing::info!(%account_id, %opening_balance, "portfolio opened");
        Ok(id)
    }

    /// Returns the number of open portfolios.
    pub async fn portfolio_count(&self) -> usize {
        self.portfolios.read().await.len()
    }

    /// Moves `amount` from available to reserved for the account.
    #[tracing::instrument(skip(self))]
    pub async fn reserve_funds(
        &self,
        account_id: AccountId,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.with_portfolio(account_id, |p| p.reserve(amount)).await?;
        metrics::counter!("ledger_reservations_total").increment(1);
        Ok(())
    }

    /// Moves `amount` from reserved back to available for the account.
    #[tracing::instrument(skip(self))]
    pub async fn release_funds(
        &self,
        account_id: AccountId,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.with_portfolio(account_id, |p| p.release(amount)).await?;
        metrics::counter!("ledger_releases_total").increment(1);
        Ok(())
    }

    /// Consumes `amount` of the account's reserved balance on settlement.
    #[tracing::instrument(skip(self))]
    pub async fn settle_funds(
        &self,
        account_id: AccountId,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.with_portfolio(account_id, |p| p.settle(amount)).await?;
        metrics::counter!("ledger_settlements_total").increment(1);
        Ok(())
    }

    /// Credits or debits the account's available balance.
    ///
    /// A positive `amount` deposits, a negative `amount` withdraws; a
    /// withdrawal below zero is rejected.
    #[tracing::instrument(skip(self))]
    pub async fn update_balance(
        &self,
        account_id: AccountId,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.with_portfolio(account_id, |p| {
            if amount.is_negative() {
                p.debit(Money::zero() - amount)
            } else {
                p.credit(amount)
            }
        })
        .await
    }

    /// Returns the `(available, reserved)` pair for the account.
    pub async fn balances(&self, account_id: AccountId) -> Result<(Money, Money), LedgerError> {
        let portfolio = self.portfolio_handle(account_id).await?;
        let portfolio = portfolio.lock().await;
        Ok((portfolio.available(), portfolio.reserved()))
    }

    /// Returns a snapshot of the account's portfolio.
    pub async fn portfolio(&self, account_id: AccountId) -> Result<Portfolio, LedgerError> {
        let portfolio = self.portfolio_handle(account_id).await?;
        let portfolio = portfolio.lock().await;
        Ok(portfolio.clone())
    }

    async fn portfolio_handle(
        &self,
        account_id: AccountId,
    ) -> Result<Arc<Mutex<Portfolio>>, LedgerError> {
        let portfolios = self.portfolios.read().await;
        portfolios
            .get(&account_id)
            .cloned()
            .ok_or(LedgerError::PortfolioNotFound(account_id))
    }

    async fn with_portfolio<F>(&self, account_id: AccountId, op: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut Portfolio) -> Result<(), LedgerError>,
    {
        let portfolio = self.portfolio_handle(account_id).await?;
        let mut portfolio = portfolio.lock().await;
        op(&mut portfolio)
    }
}
