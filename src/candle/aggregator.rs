//! Tick to candle aggregation
//!
//! Buckets trades into fixed intervals. A bucket is sealed when a tick for a
//! later interval arrives (or the timer calls [`CandleAggregator::seal_due`]),
//! and every interval without trades is filled with a synthetic flat candle so
//! the candle axis stays contiguous.

use super::{Candle, Tick, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Streaming OHLCV aggregator for a single symbol
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    timeframe: Timeframe,
    /// Forming bucket; its open time always equals `next_open`
    current: Option<Candle>,
    /// Open time of the next interval that has not been emitted yet
    next_open: Option<DateTime<Utc>>,
    /// Last traded price, used for synthetic gap candles
    last_price: Option<Decimal>,
    /// Ticks dropped because their interval was already emitted
    late_ticks: u64,
}

impl CandleAggregator {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            current: None,
            next_open: None,
            last_price: None,
            late_ticks: 0,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Last traded (or replayed close) price
    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    /// Open time of the next interval still to be emitted
    pub fn next_open(&self) -> Option<DateTime<Utc>> {
        self.next_open
    }

    /// The forming bucket, if any
    pub fn forming(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    /// Fold a tick into the current bucket.
    ///
    /// Returns the candles sealed by this tick, oldest first: the previous
    /// bucket plus one flat candle per interval skipped without trades.
    pub fn ingest(&mut self, tick: &Tick) -> Vec<Candle> {
        let bucket = self.timeframe.floor(tick.timestamp);
        let mut sealed = Vec::new();

        if matches!(self.next_open, Some(next) if bucket < next) {
            self.late_ticks += 1;
            tracing::debug!(ts = %tick.timestamp, "Dropping late tick");
            return sealed;
        }

        let forming_open = self.current.as_ref().map(|c| c.open_time);
        match forming_open {
            Some(open_time) if open_time == bucket => {
                if let Some(candle) = self.current.as_mut() {
                    candle.absorb(tick);
                }
            }
            Some(_) => {
                self.seal_current(&mut sealed);
                self.fill_until(bucket, &mut sealed);
                self.open_bucket(bucket, tick);
            }
            None => {
                self.fill_until(bucket, &mut sealed);
                self.open_bucket(bucket, tick);
            }
        }

        self.last_price = Some(tick.price);
        sealed
    }

    /// Seal everything whose interval has fully elapsed by `now`.
    ///
    /// Lets candles close on time when the market is quiet. Intervals with no
    /// trades at all become flat candles at the last known price.
    pub fn seal_due(&mut self, now: DateTime<Utc>) -> Vec<Candle> {
        let interval = self.timeframe.duration();
        let mut sealed = Vec::new();

        if matches!(&self.current, Some(c) if c.open_time + interval <= now) {
            self.seal_current(&mut sealed);
        }
        if self.current.is_none() {
            self.fill_until(self.timeframe.floor(now), &mut sealed);
        }
        sealed
    }

    /// Merge exchange-provided candles for intervals missed while disconnected.
    ///
    /// Only fully elapsed intervals that have not been emitted are accepted.
    /// An exchange candle for the forming bucket's interval replaces the
    /// partial local bucket.
    pub fn backfill(&mut self, history: &[Candle], now: DateTime<Utc>) -> Vec<Candle> {
        let interval = self.timeframe.duration();
        let mut ordered: Vec<&Candle> = history.iter().collect();
        ordered.sort_by_key(|c| c.open_time);

        let mut sealed = Vec::new();
        for candle in ordered {
            let open_time = self.timeframe.floor(candle.open_time);
            if open_time + interval > now {
                continue;
            }
            if matches!(self.next_open, Some(next) if open_time < next) {
                continue;
            }

            match self.current.as_ref().map(|c| c.open_time) {
                Some(forming) if forming == open_time => self.current = None,
                Some(_) => self.seal_current(&mut sealed),
                None => {}
            }
            self.fill_until(open_time, &mut sealed);

            let mut accepted = candle.clone();
            accepted.open_time = open_time;
            accepted.closed = true;
            self.last_price = Some(accepted.close);
            self.next_open = Some(open_time + interval);
            sealed.push(accepted);
        }
        sealed
    }

    fn open_bucket(&mut self, bucket: DateTime<Utc>, tick: &Tick) {
        self.current = Some(Candle::from_tick(bucket, tick));
        self.next_open = Some(bucket);
    }

    fn seal_current(&mut self, sealed: &mut Vec<Candle>) {
        if let Some(mut candle) = self.current.take() {
            candle.closed = true;
            self.next_open = Some(candle.open_time + self.timeframe.duration());
            sealed.push(candle);
        }
    }

    /// Emit flat candles for every unemitted interval before `target`
    fn fill_until(&mut self, target: DateTime<Utc>, sealed: &mut Vec<Candle>) {
        let interval = self.timeframe.duration();
        let Some(price) = self.last_price else {
            // Nothing traded yet, so there is no axis to keep contiguous
            if self.next_open.map_or(true, |next| next < target) {
                self.next_open = Some(target);
            }
            return;
        };

        while let Some(next) = self.next_open {
            if next >= target {
                break;
            }
            sealed.push(Candle::flat(next, price));
            self.next_open = Some(next + interval);
        }
    }
}
