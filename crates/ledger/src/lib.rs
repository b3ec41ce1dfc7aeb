//! Fund reservation ledger for the brokerage saga platform.
//!
//! The ledger is the one piece of mutable shared state in the portfolio
//! service. Saga handlers never touch balances directly: every mutation
//! goes through [`FundLedger`], which serializes operations per portfolio
//! and upholds the non-negative balance invariants.

pub mod error;
pub mod ledger;
pub mod money;
pub mod portfolio;

pub use error::LedgerError;
pub use ledger::FundLedger;
pub use money::{Currency, Money};
pub use portfolio::{AccountId, Portfolio, PortfolioId};
