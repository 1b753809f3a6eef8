//! Candle module
//!
//! Tick aggregation into fixed-interval OHLCV candles and the bounded window
//! of closed candles the detector reads

mod aggregator;
mod timeframe;
mod types;
mod window;

pub use aggregator::CandleAggregator;
pub use timeframe::{Timeframe, TimeframeError};
pub use types::{Candle, Tick};
pub use window::CandleWindow;
