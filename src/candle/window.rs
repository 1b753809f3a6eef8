//! Bounded rolling window of closed candles

use super::Candle;
use std::collections::VecDeque;

/// FIFO window of the most recent closed candles
///
/// Every candle pushed receives an absolute, monotonically increasing index,
/// so indices stay meaningful after the oldest candles are evicted.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
    /// Number of candles ever pushed
    total: u64,
}

impl CandleWindow {
    /// Create a window holding at most `capacity` candles
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    /// Append a closed candle, evicting the oldest on overflow.
    ///
    /// Returns the absolute index assigned to the candle.
    pub fn push(&mut self, candle: Candle) -> u64 {
        debug_assert!(candle.closed, "only closed candles enter the window");
        self.candles.push_back(candle);
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
        let index = self.total;
        self.total += 1;
        index
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Candle at window position `pos` (0 = oldest retained)
    pub fn get(&self, pos: usize) -> Option<&Candle> {
        self.candles.get(pos)
    }

    /// Most recent closed candle
    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Absolute index of the most recent candle
    pub fn latest_index(&self) -> Option<u64> {
        self.total.checked_sub(1)
    }

    /// Absolute index of the candle at window position `pos`
    pub fn index_at(&self, pos: usize) -> u64 {
        self.total - self.candles.len() as u64 + pos as u64
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Candle> + ExactSizeIterator {
        self.candles.iter()
    }

    /// Contiguous slice view of the window (oldest first)
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn candle(i: i64) -> Candle {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Candle::flat(t0 + Duration::minutes(15 * i), Decimal::from(100 + i))
    }

    #[test]
    fn test_push_assigns_indices() {
        let mut window = CandleWindow::new(3);
        assert_eq!(window.latest_index(), None);
        assert_eq!(window.push(candle(0)), 0);
        assert_eq!(window.push(candle(1)), 1);
        assert_eq!(window.latest_index(), Some(1));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut window = CandleWindow::new(3);
        for i in 0..5 {
            window.push(candle(i));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.get(0).unwrap().close, Decimal::from(102));
        assert_eq!(window.latest().unwrap().close, Decimal::from(104));
        assert_eq!(window.index_at(0), 2);
        assert_eq!(window.latest_index(), Some(4));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut window = CandleWindow::new(0);
        window.push(candle(0));
        window.push(candle(1));
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.len(), 1);
    }
}
