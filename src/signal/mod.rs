//! Signal generation module
//!
//! Order block detection over closed candles

mod detector;
mod indicators;
mod types;

pub use detector::{DetectorConfig, OrderBlockDetector};
pub use indicators::{atr_ratio, percentile_rank, trend};
pub use types::{Direction, NoSignalReason, OrderBlock, PriceRange, Trend, TrendBias};
