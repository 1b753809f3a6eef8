//! Order block detection
//!
//! Classifies the newest closed candles of the window:
//! 1. Impulse: body move of at least `sensitivity`
//! 2. Conviction: volume percentile rank over the trend period
//! 3. Trend alignment per the configured bias
//! 4. Order block: last opposing candle right before the impulse
//! 5. Optional ATR spike filter
//! 6. Spacing from the last trade
//!
//! Detection is a pure function of the window, the configuration and the
//! last trade index, so replaying a window always yields the same result.

use super::indicators::{self, ATR_BASELINE, ATR_PERIOD};
use super::{Direction, NoSignalReason, OrderBlock, PriceRange, TrendBias};
use crate::candle::{Candle, CandleWindow, Timeframe};
use crate::config::StrategyConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Detector configuration
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum absolute body move, as a fraction (0.015 = 1.5%)
    pub sensitivity: Decimal,
    /// Minimum volume percentile rank (0-100)
    pub min_volume_percentile: Decimal,
    /// Candles used for the trend and volume rank
    pub trend_period: usize,
    /// Minimum candles between trades
    pub min_trades_distance: u64,
    pub bias: TrendBias,
    /// How many of the newest candles are considered as impulse candidates
    pub impulse_lookback: usize,
    /// How far back from the impulse to look for the opposing candle
    pub block_search_depth: usize,
    /// Reject when ATR exceeds this multiple of its recent average
    pub max_atr_ratio: Option<Decimal>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: dec!(0.015),
            min_volume_percentile: dec!(50),
            trend_period: 20,
            min_trades_distance: 10,
            bias: TrendBias::WithTrend,
            impulse_lookback: 1,
            block_search_depth: 5,
            max_atr_ratio: None,
        }
    }
}

impl From<&StrategyConfig> for DetectorConfig {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            min_volume_percentile: config.min_volume_percentile,
            trend_period: config.trend_period,
            min_trades_distance: config.min_trades_distance,
            bias: config.bias,
            impulse_lookback: config.impulse_lookback,
            block_search_depth: config.block_search_depth,
            max_atr_ratio: config.max_atr_ratio,
        }
    }
}

/// Stateless order block detector
#[derive(Debug, Clone)]
pub struct OrderBlockDetector {
    config: DetectorConfig,
    timeframe: Timeframe,
}

impl OrderBlockDetector {
    pub fn new(config: DetectorConfig, timeframe: Timeframe) -> Self {
        Self { config, timeframe }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Candles of history needed beyond the trend period
    pub fn max_lookback(&self) -> usize {
        let atr_history = if self.config.max_atr_ratio.is_some() {
            ATR_PERIOD + ATR_BASELINE
        } else {
            0
        };
        self.config
            .block_search_depth
            .max(atr_history)
            .saturating_add(self.config.impulse_lookback.max(1) - 1)
    }

    /// Window capacity the engine should allocate
    pub fn window_capacity(&self) -> usize {
        self.max_lookback() + self.config.trend_period
    }

    /// Run detection on the newest closed candle(s).
    pub fn detect(&self, window: &CandleWindow, last_trade_index: Option<u64>) -> Option<OrderBlock> {
        self.evaluate(window, last_trade_index).ok()
    }

    /// Same as [`detect`](Self::detect) but reports why nothing was emitted.
    pub fn evaluate(
        &self,
        window: &CandleWindow,
        last_trade_index: Option<u64>,
    ) -> Result<OrderBlock, NoSignalReason> {
        let need = self.config.trend_period.max(1);
        if window.len() < need {
            return Err(NoSignalReason::InsufficientHistory {
                have: window.len(),
                need,
            });
        }
        let newest_index = window.latest_index().ok_or(NoSignalReason::InsufficientHistory {
            have: 0,
            need,
        })?;

        if let Some(last) = last_trade_index {
            let distance = newest_index.saturating_sub(last);
            if distance < self.config.min_trades_distance {
                return Err(NoSignalReason::TooSoonAfterTrade {
                    distance,
                    required: self.config.min_trades_distance,
                });
            }
        }

        let candles = window.to_vec();
        let newest_pos = candles.len() - 1;
        let lookback = self.config.impulse_lookback.max(1);

        let mut best: Option<OrderBlock> = None;
        let mut first_reason: Option<NoSignalReason> = None;

        // Newest first so the first rejection reported is the newest candle's
        for offset in 0..lookback {
            let Some(pos) = newest_pos.checked_sub(offset) else {
                break;
            };
            if pos + 1 < need {
                break;
            }
            match self.evaluate_candidate(&candles, pos, window.index_at(pos)) {
                Ok(block) => {
                    let better = match &best {
                        None => true,
                        Some(current) => {
                            block.impulse_candle_index > current.impulse_candle_index
                                || (block.impulse_candle_index == current.impulse_candle_index
                                    && block.volume_percentile > current.volume_percentile)
                        }
                    };
                    if better {
                        best = Some(block);
                    }
                }
                Err(reason) => {
                    first_reason.get_or_insert(reason);
                }
            }
        }

        best.ok_or_else(|| first_reason.unwrap_or(NoSignalReason::NoImpulse))
    }

    fn evaluate_candidate(
        &self,
        candles: &[Candle],
        pos: usize,
        index: u64,
    ) -> Result<OrderBlock, NoSignalReason> {
        let impulse = &candles[pos];
        let body_move = impulse.body_move();
        if body_move.abs() < self.config.sensitivity || body_move.is_zero() {
            return Err(NoSignalReason::NoImpulse);
        }
        let direction = if body_move > Decimal::ZERO {
            Direction::Long
        } else {
            Direction::Short
        };

        let period = self.config.trend_period.max(1);
        let trailing = &candles[pos + 1 - period..=pos];

        let volumes: Vec<Decimal> = trailing.iter().map(|c| c.volume).collect();
        let volume_percentile = indicators::percentile_rank(&volumes, impulse.volume);
        if volume_percentile < self.config.min_volume_percentile {
            return Err(NoSignalReason::LowVolume);
        }

        let closes: Vec<Decimal> = trailing.iter().map(|c| c.close).collect();
        let trend = indicators::trend(&closes);
        if !self.config.bias.allows(direction, trend) {
            return Err(NoSignalReason::TrendMismatch);
        }

        let depth = self.config.block_search_depth;
        let block_pos = (pos.saturating_sub(depth)..pos).rev().find(|&k| {
            let candle = &candles[k];
            match direction {
                Direction::Long => candle.is_bearish(),
                Direction::Short => candle.is_bullish(),
            }
        });
        let Some(block_pos) = block_pos else {
            return Err(NoSignalReason::NoOpposingCandle);
        };

        if let Some(max_ratio) = self.config.max_atr_ratio {
            if let Some(ratio) = indicators::atr_ratio(candles, pos) {
                if ratio > max_ratio {
                    return Err(NoSignalReason::VolatilityTooHigh);
                }
            }
        }

        let block = &candles[block_pos];
        Ok(OrderBlock {
            direction,
            range: PriceRange {
                low: block.low,
                high: block.high,
            },
            originating_candle_index: index - (pos - block_pos) as u64,
            impulse_candle_index: index,
            reference_price: impulse.close,
            impulse_move: body_move,
            volume_percentile,
            trend,
            detected_at: impulse.close_time(self.timeframe.duration()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Trend;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(15 * i)
    }

    fn bar(i: i64, open: Decimal, close: Decimal, volume: Decimal) -> Candle {
        Candle {
            open_time: t(i),
            open,
            high: open.max(close) + dec!(1),
            low: open.min(close) - dec!(1),
            close,
            volume,
            closed: true,
        }
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            sensitivity: dec!(0.01),
            min_volume_percentile: dec!(90),
            trend_period: 20,
            min_trades_distance: 10,
            bias: TrendBias::WithTrend,
            impulse_lookback: 1,
            block_search_depth: 5,
            max_atr_ratio: None,
        }
    }

    fn detector(config: DetectorConfig) -> OrderBlockDetector {
        OrderBlockDetector::new(config, "15m".parse().unwrap())
    }

    /// 19 bars drifting down (alternating bodies), then a -2% impulse with
    /// the second highest volume of the trend period.
    fn down_impulse_window() -> CandleWindow {
        let mut window = CandleWindow::new(40);
        let mut price = dec!(2000);
        for i in 0..19 {
            let (open, close) = if i % 2 == 0 {
                (price, price + dec!(2))
            } else {
                (price, price - dec!(6))
            };
            let volume = if i == 5 { dec!(500) } else { Decimal::from(10 + i) };
            window.push(bar(i, open, close, volume));
            price = close;
        }
        // Last setup bar (i = 18) is bullish: the order block
        let open = price;
        let close = open * dec!(0.98);
        window.push(bar(19, open, close, dec!(400)));
        window
    }

    #[test]
    fn test_short_window_returns_none() {
        let det = detector(config());
        let mut window = CandleWindow::new(40);
        for i in 0..19 {
            window.push(bar(i, dec!(100), dec!(103), dec!(100)));
        }
        assert!(det.detect(&window, None).is_none());
        assert_eq!(
            det.evaluate(&window, None),
            Err(NoSignalReason::InsufficientHistory { have: 19, need: 20 })
        );
        assert!(det.detect(&CandleWindow::new(5), None).is_none());
    }

    #[test]
    fn test_detects_short_order_block() {
        let det = detector(config());
        let window = down_impulse_window();

        let block = det.detect(&window, None).expect("expected a signal");
        assert_eq!(block.direction, Direction::Short);
        assert_eq!(block.trend, Trend::Down);
        assert_eq!(block.volume_percentile, dec!(95));
        assert_eq!(block.impulse_candle_index, 19);
        assert_eq!(block.originating_candle_index, 18);
        assert_eq!(block.impulse_move, dec!(-0.02));
        assert_eq!(block.detected_at, t(20));

        let ob = window.get(18).unwrap();
        assert_eq!(block.range.low, ob.low);
        assert_eq!(block.range.high, ob.high);
        assert_eq!(block.reference_price, window.latest().unwrap().close);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let det = detector(config());
        let window = down_impulse_window();
        let first = det.detect(&window, Some(3));
        let second = det.detect(&window, Some(3));
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn test_small_move_is_not_impulse() {
        let det = detector(DetectorConfig {
            sensitivity: dec!(0.03),
            ..config()
        });
        let window = down_impulse_window();
        assert_eq!(det.evaluate(&window, None), Err(NoSignalReason::NoImpulse));
    }

    #[test]
    fn test_low_volume_rejected() {
        let det = detector(DetectorConfig {
            min_volume_percentile: dec!(96),
            ..config()
        });
        let window = down_impulse_window();
        assert_eq!(det.evaluate(&window, None), Err(NoSignalReason::LowVolume));
    }

    #[test]
    fn test_trend_bias_controls_direction() {
        let window = down_impulse_window();
        let counter = detector(DetectorConfig {
            bias: TrendBias::CounterTrend,
            ..config()
        });
        assert_eq!(counter.evaluate(&window, None), Err(NoSignalReason::TrendMismatch));

        let any = detector(DetectorConfig {
            bias: TrendBias::Any,
            ..config()
        });
        assert!(any.detect(&window, None).is_some());
    }

    #[test]
    fn test_spacing_blocks_recent_trade() {
        let det = detector(config());
        let window = down_impulse_window();
        assert_eq!(
            det.evaluate(&window, Some(12)),
            Err(NoSignalReason::TooSoonAfterTrade {
                distance: 7,
                required: 10
            })
        );
        assert!(det.detect(&window, Some(9)).is_some());
    }

    #[test]
    fn test_requires_opposing_candle() {
        let det = detector(DetectorConfig {
            bias: TrendBias::Any,
            ..config()
        });
        let mut window = CandleWindow::new(40);
        for i in 0..19 {
            // Every bar bearish: no bullish block before a down impulse
            window.push(bar(i, dec!(100), dec!(99.9), Decimal::from(10 + i)));
        }
        window.push(bar(19, dec!(100), dec!(97), dec!(1000)));
        assert_eq!(det.evaluate(&window, None), Err(NoSignalReason::NoOpposingCandle));
    }

    #[test]
    fn test_lookback_prefers_most_recent_impulse() {
        let det = detector(DetectorConfig {
            bias: TrendBias::Any,
            min_volume_percentile: dec!(80),
            impulse_lookback: 3,
            ..config()
        });
        let mut window = CandleWindow::new(40);
        for i in 0..20 {
            let (open, close) = if i % 2 == 0 {
                (dec!(100), dec!(101))
            } else {
                (dec!(101), dec!(100))
            };
            window.push(bar(i, open, close, Decimal::from(10 + i)));
        }
        // Two qualifying impulses in a row; the newer one wins
        window.push(bar(20, dec!(100), dec!(103), dec!(900)));
        window.push(bar(21, dec!(103), dec!(99), dec!(800)));

        let block = det.detect(&window, None).unwrap();
        assert_eq!(block.impulse_candle_index, 21);
        assert_eq!(block.direction, Direction::Short);
        assert_eq!(block.originating_candle_index, 20);
    }

    #[test]
    fn test_atr_filter_rejects_spike() {
        let det = detector(DetectorConfig {
            bias: TrendBias::Any,
            min_volume_percentile: dec!(0),
            max_atr_ratio: Some(dec!(1.5)),
            ..config()
        });
        let mut window = CandleWindow::new(det.window_capacity());
        for i in 0..39 {
            let (open, close) = if i % 2 == 0 {
                (dec!(100), dec!(100.5))
            } else {
                (dec!(100.5), dec!(100))
            };
            window.push(bar(i, open, close, dec!(10)));
        }
        let mut spike = bar(39, dec!(100), dec!(80), dec!(10));
        spike.low = dec!(60);
        window.push(spike);
        assert_eq!(det.evaluate(&window, None), Err(NoSignalReason::VolatilityTooHigh));
    }

    #[test]
    fn test_window_capacity() {
        let det = detector(config());
        assert_eq!(det.max_lookback(), 5);
        assert_eq!(det.window_capacity(), 25);

        let with_atr = detector(DetectorConfig {
            max_atr_ratio: Some(dec!(1.5)),
            impulse_lookback: 2,
            ..config()
        });
        assert_eq!(with_atr.max_lookback(), 35);
    }
}
