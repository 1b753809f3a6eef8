//! Market data feed module
//!
//! Live trades from the Delta Exchange `all_trades` channel, with
//! connectivity events and replay of candles missed while disconnected

mod delta;
mod types;

pub use delta::DeltaFeed;
pub use types::{ConnectionStatus, FeedEvent};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for market data feed implementations
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Start streaming; the receiver closes when the feed gives up
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<FeedEvent>>;
}
