//! Indicator helpers used by the detector

use super::Trend;
use crate::candle::Candle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// ATR lookback
pub const ATR_PERIOD: usize = 14;
/// Number of ATR values averaged for the volatility baseline
pub const ATR_BASELINE: usize = 20;

/// Percentile rank (0-100) of `value` within `sample`, average method.
///
/// `rank = below + (equal + 1) / 2`, `pct = rank / n * 100`, where `equal`
/// counts every sample equal to `value`. `value` is expected to be part of
/// `sample`.
pub fn percentile_rank(sample: &[Decimal], value: Decimal) -> Decimal {
    if sample.is_empty() {
        return Decimal::ZERO;
    }
    let below = sample.iter().filter(|v| **v < value).count();
    let equal = sample.iter().filter(|v| **v == value).count();
    let rank = Decimal::from(below) + Decimal::from(equal + 1) / dec!(2);
    let n = Decimal::from(sample.len());
    (rank / n * dec!(100)).min(dec!(100))
}

/// Trend from the sign of the least-squares slope of `closes`.
///
/// Uses the exact numerator `n * Σ(i * c_i) - Σi * Σc_i`.
pub fn trend(closes: &[Decimal]) -> Trend {
    let n = closes.len();
    if n < 2 {
        return Trend::Flat;
    }
    let mut sum_i = Decimal::ZERO;
    let mut sum_c = Decimal::ZERO;
    let mut sum_ic = Decimal::ZERO;
    for (i, close) in closes.iter().enumerate() {
        let i = Decimal::from(i);
        sum_i += i;
        sum_c += *close;
        sum_ic += i * *close;
    }
    let numerator = Decimal::from(n) * sum_ic - sum_i * sum_c;
    if numerator > Decimal::ZERO {
        Trend::Up
    } else if numerator < Decimal::ZERO {
        Trend::Down
    } else {
        Trend::Flat
    }
}

/// True range of `candle` given the previous close
pub fn true_range(candle: &Candle, prev_close: Decimal) -> Decimal {
    let hl = candle.high - candle.low;
    let hc = (candle.high - prev_close).abs();
    let lc = (candle.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Simple-average ATR ending at `pos` (inclusive)
pub fn atr_at(candles: &[Candle], pos: usize, period: usize) -> Option<Decimal> {
    if period == 0 || pos < period || pos >= candles.len() {
        return None;
    }
    let sum: Decimal = (pos + 1 - period..=pos)
        .map(|k| true_range(&candles[k], candles[k - 1].close))
        .sum();
    Some(sum / Decimal::from(period))
}

/// Ratio of the ATR at `pos` to the mean of the last `baseline` ATR values.
///
/// `None` when there is not enough history.
pub fn atr_ratio(candles: &[Candle], pos: usize) -> Option<Decimal> {
    if pos + 1 < ATR_BASELINE {
        return None;
    }
    let values: Option<Vec<Decimal>> = (pos + 1 - ATR_BASELINE..=pos)
        .map(|k| atr_at(candles, k, ATR_PERIOD))
        .collect();
    let values = values?;
    let mean = values.iter().copied().sum::<Decimal>() / Decimal::from(values.len());
    let current = *values.last()?;
    if mean.is_zero() {
        return None;
    }
    Some(current / mean)
}
