//! Signal types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prevailing trend over the trend period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// How an impulse must relate to the prevailing trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendBias {
    /// Longs only in an uptrend, shorts only in a downtrend
    #[default]
    WithTrend,
    /// Fade the trend: longs in a downtrend, shorts in an uptrend
    CounterTrend,
    /// Ignore the trend
    Any,
}

impl TrendBias {
    /// Whether an impulse in `direction` is allowed under `trend`
    pub fn allows(&self, direction: Direction, trend: Trend) -> bool {
        match (self, direction, trend) {
            (TrendBias::Any, _, _) => true,
            (TrendBias::WithTrend, Direction::Long, Trend::Up) => true,
            (TrendBias::WithTrend, Direction::Short, Trend::Down) => true,
            (TrendBias::CounterTrend, Direction::Long, Trend::Down) => true,
            (TrendBias::CounterTrend, Direction::Short, Trend::Up) => true,
            _ => false,
        }
    }
}

/// Inclusive price band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub low: Decimal,
    pub high: Decimal,
}

impl PriceRange {
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.low && price <= self.high
    }
}

/// A detected order block
///
/// The block is the last candle opposing an impulsive move; its range marks
/// the supply/demand zone. Consumed at most once by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    /// Trade direction implied by the impulse
    pub direction: Direction,
    /// High/low of the opposing candle
    pub range: PriceRange,
    /// Absolute window index of the opposing candle
    pub originating_candle_index: u64,
    /// Absolute window index of the impulse candle
    pub impulse_candle_index: u64,
    /// Close of the impulse candle, used as the entry reference
    pub reference_price: Decimal,
    /// Body move of the impulse candle
    pub impulse_move: Decimal,
    /// Volume percentile rank (0-100) of the impulse candle
    pub volume_percentile: Decimal,
    pub trend: Trend,
    /// Close time of the impulse candle
    pub detected_at: DateTime<Utc>,
}

/// Why the detector produced no signal for a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoSignalReason {
    /// Fewer candles than the trend period
    InsufficientHistory { have: usize, need: usize },
    /// Too few candles since the last trade
    TooSoonAfterTrade { distance: u64, required: u64 },
    /// Body move below sensitivity
    NoImpulse,
    /// Impulse volume rank below the minimum
    LowVolume,
    /// Impulse direction not allowed under the trend bias
    TrendMismatch,
    /// No opposing candle before the impulse
    NoOpposingCandle,
    /// ATR spiked above the configured ratio
    VolatilityTooHigh,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.sign(), dec!(-1));
        assert_eq!(Direction::Long.to_string(), "long");
    }

    #[test]
    fn test_with_trend_bias() {
        let bias = TrendBias::WithTrend;
        assert!(bias.allows(Direction::Long, Trend::Up));
        assert!(bias.allows(Direction::Short, Trend::Down));
        assert!(!bias.allows(Direction::Long, Trend::Down));
        assert!(!bias.allows(Direction::Short, Trend::Flat));
    }

    #[test]
    fn test_counter_trend_bias() {
        let bias = TrendBias::CounterTrend;
        assert!(bias.allows(Direction::Long, Trend::Down));
        assert!(!bias.allows(Direction::Long, Trend::Up));
        assert!(TrendBias::Any.allows(Direction::Short, Trend::Flat));
    }

    #[test]
    fn test_bias_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            bias: TrendBias,
        }
        let w: Wrapper = toml::from_str(r#"bias = "counter_trend""#).unwrap();
        assert_eq!(w.bias, TrendBias::CounterTrend);
    }

    #[test]
    fn test_price_range_contains() {
        let range = PriceRange {
            low: dec!(100),
            high: dec!(110),
        };
        assert!(range.contains(dec!(100)));
        assert!(range.contains(dec!(105.5)));
        assert!(!range.contains(dec!(110.01)));
    }
}
