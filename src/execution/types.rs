//! Execution types

use crate::signal::Direction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exchange-assigned order identifier
pub type OrderId = String;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that opens a position in `direction`
    pub fn opening(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side that reduces a position in `direction`
    pub fn closing(direction: Direction) -> Self {
        Self::opening(direction.opposite())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Market order (immediate execution)
    Market,
    /// Resting stop that becomes a market order at `stop_price`
    StopMarket,
}

/// An order to be submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    /// Quantity in base units
    pub size: Decimal,
    pub order_type: OrderType,
    /// Trigger price for stop orders
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
    /// Price the caller expects to trade around (paper fills use it)
    pub expected_price: Option<Decimal>,
}

impl OrderRequest {
    /// Market order opening a position
    pub fn market_entry(symbol: &str, direction: Direction, size: Decimal, expected_price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: OrderSide::opening(direction),
            size,
            order_type: OrderType::Market,
            stop_price: None,
            reduce_only: false,
            expected_price: Some(expected_price),
        }
    }

    /// Reduce-only market order closing a position
    pub fn market_exit(symbol: &str, direction: Direction, size: Decimal, expected_price: Option<Decimal>) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: OrderSide::closing(direction),
            size,
            order_type: OrderType::Market,
            stop_price: None,
            reduce_only: true,
            expected_price,
        }
    }

    /// Reduce-only protective stop
    pub fn stop_loss(symbol: &str, direction: Direction, size: Decimal, stop_price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: OrderSide::closing(direction),
            size,
            order_type: OrderType::StopMarket,
            stop_price: Some(stop_price),
            reduce_only: true,
            expected_price: Some(stop_price),
        }
    }
}

/// Exchange-reported order state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Completely filled
    Filled,
    /// Some quantity filled, remainder cancelled or resting
    PartiallyFilled,
    /// Accepted and resting (or fill not yet confirmed)
    Accepted,
    /// Refused by the exchange
    Rejected,
    Cancelled,
}

/// Result of an order submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub id: OrderId,
    pub status: OrderStatus,
    /// Average fill price, when anything filled
    pub fill_price: Option<Decimal>,
    /// Filled quantity in base units
    pub filled_size: Decimal,
    /// Exchange message for rejections
    pub reason: Option<String>,
}

impl OrderResult {
    pub fn is_filled(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::PartiallyFilled)
            && self.filled_size > Decimal::ZERO
    }
}

/// Exchange view of the open position for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub direction: Direction,
    /// Absolute quantity in base units
    pub size: Decimal,
    pub entry_price: Decimal,
}

/// A simulated fill recorded by the paper exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
    pub timestamp: DateTime<Utc>,
}

/// Listing entry for `products`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: u64,
    pub symbol: String,
    pub description: String,
    pub contract_type: String,
    /// Base units per contract
    pub contract_value: Option<Decimal>,
}

/// Exchange call errors
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// Call did not complete in time; outcome unknown
    #[error("Exchange call timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// Transport failure; outcome unknown
    #[error("Network error: {0}")]
    Network(String),
    /// Order refused
    #[error("Order rejected: {0}")]
    Rejected(String),
    /// Non-success HTTP response
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    /// Unexpected response body
    #[error("Failed to decode response: {0}")]
    Decode(String),
    /// Referenced order does not exist
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),
}

impl ExchangeError {
    /// Whether the request may have reached the exchange and can be retried
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Timeout(_) | ExchangeError::Network(_) => true,
            ExchangeError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
