//! Candle and tick types

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single trade print from the exchange stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Trade price
    pub price: Decimal,
    /// Traded quantity
    pub volume: Decimal,
    /// Exchange timestamp of the trade
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(price: Decimal, volume: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            price,
            volume,
            timestamp,
        }
    }
}

/// OHLCV bar for one fixed interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Interval start
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Sealed candles never change again
    pub closed: bool,
}

impl Candle {
    /// Open a new bucket seeded with a single tick
    pub fn from_tick(open_time: DateTime<Utc>, tick: &Tick) -> Self {
        Self {
            open_time,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
            closed: false,
        }
    }

    /// Synthetic zero-volume candle used to fill an interval with no trades
    pub fn flat(open_time: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            closed: true,
        }
    }

    /// Fold a tick into a forming candle
    pub fn absorb(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume += tick.volume;
    }

    /// Interval end for a given interval length
    pub fn close_time(&self, interval: Duration) -> DateTime<Utc> {
        self.open_time + interval
    }

    /// Body displacement relative to the open: (close - open) / open
    pub fn body_move(&self) -> Decimal {
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        (self.close - self.open) / self.open
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn tick(price: Decimal, volume: Decimal) -> Tick {
        Tick::new(price, volume, Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    #[test]
    fn test_absorb_updates_ohlcv() {
        let t0 = tick(dec!(100), dec!(1));
        let mut candle = Candle::from_tick(t0.timestamp, &t0);
        candle.absorb(&tick(dec!(105), dec!(2)));
        candle.absorb(&tick(dec!(98), dec!(0.5)));

        assert_eq!(candle.open, dec!(100));
        assert_eq!(candle.high, dec!(105));
        assert_eq!(candle.low, dec!(98));
        assert_eq!(candle.close, dec!(98));
        assert_eq!(candle.volume, dec!(3.5));
        assert!(!candle.closed);
    }

    #[test]
    fn test_flat_candle() {
        let candle = Candle::flat(Utc::now(), dec!(2500));
        assert_eq!(candle.high, candle.low);
        assert_eq!(candle.volume, Decimal::ZERO);
        assert!(candle.closed);
        assert_eq!(candle.body_move(), Decimal::ZERO);
    }

    #[test]
    fn test_body_move_direction() {
        let t0 = tick(dec!(100), dec!(1));
        let mut candle = Candle::from_tick(t0.timestamp, &t0);
        candle.absorb(&tick(dec!(98), dec!(1)));
        assert_eq!(candle.body_move(), dec!(-0.02));
        assert!(candle.is_bearish());
        assert!(!candle.is_bullish());
    }
}
