//! Ledger error types.

use thiserror::Error;

use crate::money::Money;
use crate::portfolio::AccountId;

/// Errors that can occur during ledger operations.
///
/// `InsufficientFunds` and `OverRelease` are business-rule rejections,
/// not faults: saga handlers translate them into compensation events
/// instead of letting them escape.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The reservation asked for more than the available balance.
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Money, available: Money },

    /// The release asked for more than the reserved balance.
    #[error("Over-release: requested {requested}, reserved {reserved}")]
    OverRelease { requested: Money, reserved: Money },

    /// The settlement asked for more than the reserved balance.
    #[error("Over-settlement: requested {requested}, reserved {reserved}")]
    OverSettlement { requested: Money, reserved: Money },

    /// The debit would push the available balance below zero.
    #[error("Insufficient funds for debit: requested {requested}, available {available}")]
    InsufficientForDebit { requested: Money, available: Money },

    /// Ledger operations require strictly positive amounts.
    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(Money),

    /// No portfolio exists for the account.
    #[error("Portfolio not found for account {0}")]
    PortfolioNotFound(AccountId),

    /// A portfolio already exists for the account.
    #[error("Portfolio already exists for account {0}")]
    DuplicatePortfolio(AccountId),
}
