//! The portfolio record and its balance invariants.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::money::{Currency, Money};

/// Unique identifier for a brokerage account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Creates a new random account ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an account ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AccountId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Unique identifier for a portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortfolioId(Uuid);

impl PortfolioId {
    /// Creates a new random portfolio ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a portfolio ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PortfolioId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PortfolioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A customer's cash position: available funds plus funds reserved for
/// working orders.
///
/// Balances are private; they change only through the operations below,
/// each of which rejects any mutation that would drive a balance
/// negative. `available + reserved` is conserved across reserve/release
/// pairs; deposits, withdrawals and settlements are the only operations
/// that change the total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    id: PortfolioId,
    account_id: AccountId,
    currency: Currency,
    available: Money,
    reserved: Money,
}

impl Portfolio {
    /// Opens a portfolio with an opening available balance.
    pub fn open(
        account_id: AccountId,
        currency: Currency,
        opening_balance: Money,
    ) -> Result<Self, LedgerError> {
        if opening_balance.is_negative() {
            return Err(LedgerError::InvalidAmount(opening_balance));
        }
        Ok(Self {
            id: PortfolioId::new(),
            account_id,
            currency,
            available: opening_balance,
            reserved: Money::zero(),
        })
    }

    /// Returns the portfolio ID.
    pub fn id(&self) -> PortfolioId {
        self.id
    }

    /// Returns the owning account ID.
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Returns the portfolio currency.
    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Returns the available balance.
    pub fn available(&self) -> Money {
        self.available
    }

    /// Returns the reserved balance.
    pub fn reserved(&self) -> Money {
        self.reserved
    }

    /// Returns the total entitled funds (available + reserved).
    pub fn total(&self) -> Money {
        self.available + self.reserved
    }

    /// Moves `amount` from available to reserved.
    pub fn reserve(&mut self, amount: Money) -> Result<(), LedgerError> {
        Self::require_positive(amount)?;
        if amount > self.available {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        self.reserved += amount;
        Ok(())
    }

    /// Moves `amount` from reserved back to available.
    pub fn release(&mut self, amount: Money) -> Result<(), LedgerError> {
        Self::require_positive(amount)?;
        if amount > self.reserved {
            return Err(LedgerError::OverRelease {
                requested: amount,
                reserved: self.reserved,
            });
        }
        self.reserved -= amount;
        self.available += amount;
        Ok(())
    }

    /// Consumes `amount` of the reserved balance on settlement; the funds
    /// leave the portfolio.
    pub fn settle(&mut self, amount: Money) -> Result<(), LedgerError> {
        Self::require_positive(amount)?;
        if amount > self.reserved {
            return Err(LedgerError::OverSettlement {
                requested: amount,
                reserved: self.reserved,
            });
        }
        self.reserved -= amount;
        Ok(())
    }

    /// Credits the available balance (deposit).
    pub fn credit(&mut self, amount: Money) -> Result<(), LedgerError> {
        Self::require_positive(amount)?;
        self.available += amount;
        Ok(())
    }

    /// Debits the available balance (withdrawal).
    pub fn debit(&mut self, amount: Money) -> Result<(), LedgerError> {
        Self::require_positive(amount)?;
        if amount > self.available {
            return Err(LedgerError::InsufficientForDebit {
                requested: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        Ok(())
    }

    fn require_positive(amount: Money) -> Result<(), LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portfolio(available_cents: i64) -> Portfolio {
        Portfolio::open(
            AccountId::new(),
            Currency::usd(),
            Money::from_cents(available_cents),
        )
        .unwrap()
    }

    #[test]
    fn reserve_then_release_restores_prior_balances() {
        let mut p = portfolio(1000);
        let before = (p.available(), p.reserved());

        p.reserve(Money::from_cents(400)).unwrap();
        assert_eq!(p.available(), Money::from_cents(600));
        assert_eq!(p.reserved(), Money::from_cents(400));

        p.release(Money::from_cents(400)).unwrap();
        assert_eq!((p.available(), p.reserved()), before);
    }

    #[test]
    fn reserve_more_than_available_fails_and_leaves_balances() {
        let mut p = portfolio(100);

        let result = p.reserve(Money::from_cents(500));
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
        assert_eq!(p.available(), Money::from_cents(100));
        assert_eq!(p.reserved(), Money::zero());
    }

    #[test]
    fn release_more_than_reserved_fails_and_leaves_balances() {
        let mut p = portfolio(1000);
        p.reserve(Money::from_cents(200)).unwrap();

        let result = p.release(Money::from_cents(300));
        assert!(matches!(result, Err(LedgerError::OverRelease { .. })));
        assert_eq!(p.available(), Money::from_cents(800));
        assert_eq!(p.reserved(), Money::from_cents(200));
    }

    #[test]
    fn total_is_conserved_across_reserve_release() {
        let mut p = portfolio(1000);
        assert_eq!(p.total(), Money::from_cents(1000));

        p.reserve(Money::from_cents(750)).unwrap();
        assert_eq!(p.total(), Money::from_cents(1000));

        p.release(Money::from_cents(750)).unwrap();
        assert_eq!(p.total(), Money::from_cents(1000));
    }

    #[test]
    fn settle_consumes_reserved_funds() {
        let mut p = portfolio(1000);
        p.reserve(Money::from_cents(400)).unwrap();

        p.settle(Money::from_cents(400)).unwrap();
        assert_eq!(p.available(), Money::from_cents(600));
        assert_eq!(p.reserved(), Money::zero());
        assert_eq!(p.total(), Money::from_cents(600));
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        let mut p = portfolio(1000);

        assert!(matches!(
            p.reserve(Money::zero()),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            p.release(Money::from_cents(-5)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            p.credit(Money::zero()),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn debit_below_zero_is_rejected() {
        let mut p = portfolio(100);
        let result = p.debit(Money::from_cents(200));
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientForDebit { .. })
        ));
        assert_eq!(p.available(), Money::from_cents(100));
    }

    #[test]
    fn negative_opening_balance_is_rejected() {
        let result = Portfolio::open(AccountId::new(), Currency::usd(), Money::from_cents(-1));
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }
}
