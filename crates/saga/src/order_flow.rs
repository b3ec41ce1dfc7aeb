//! Names shared by the order saga choreography.

/// Topic carrying order lifecycle events, published by the orders service.
pub const ORDERS_TOPIC: &str = "orders.events";

/// Topic carrying fund movement events, published by the portfolio service.
pub const PORTFOLIO_TOPIC: &str = "portfolio.events";

/// Reservation failure reason: the order cost exceeds the available balance.
pub const REASON_INSUFFICIENT_FUNDS: &str = "insufficient_funds";
