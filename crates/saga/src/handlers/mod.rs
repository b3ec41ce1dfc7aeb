//! Saga step handlers for the portfolio service.

pub mod release_funds;
pub mod reserve_funds;
pub mod settle_funds;

pub use release_funds::ReleaseFundsHandler;
pub use reserve_funds::ReserveFundsHandler;
pub use settle_funds::SettleFundsHandler;
