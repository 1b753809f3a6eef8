//! Execution module
//!
//! Exchange order surface (paper and live) and candle history

mod delta;
mod paper;
mod types;

pub use delta::DeltaClient;
pub use paper::PaperExchange;
pub use types::{
    ExchangeError, Fill, OrderId, OrderRequest, OrderResult, OrderSide, OrderStatus, OrderType,
    PositionSnapshot, ProductInfo,
};

use crate::candle::{Candle, Timeframe};
use crate::risk::AccountState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;

/// Narrow order surface of the exchange
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Submit an order
    async fn place_order(&self, order: OrderRequest) -> Result<OrderResult, ExchangeError>;
    /// Move the trigger of a resting stop order
    async fn modify_stop(&self, order_id: &str, stop_price: Decimal) -> Result<(), ExchangeError>;
    /// Cancel an order
    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;
    /// Open position for `symbol`, if any
    async fn get_position(&self, symbol: &str) -> Result<Option<PositionSnapshot>, ExchangeError>;
    /// Wallet balance
    async fn get_balance(&self) -> Result<AccountState, ExchangeError>;
}

/// Historical candles, used to replay intervals missed during a disconnect
#[async_trait]
pub trait CandleHistory: Send + Sync {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// Bound an exchange call by `limit`
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ExchangeError>
where
    F: Future<Output = Result<T, ExchangeError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout(limit)),
    }
}
