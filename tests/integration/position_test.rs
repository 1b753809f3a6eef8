//! Single-position invariant under a stream of qualifying signals

use chrono::{DateTime, Duration, TimeZone, Utc};
use ob_trader::candle::Tick;
use ob_trader::config::Config;
use ob_trader::engine::TradeEngine;
use ob_trader::execution::{Exchange, Fill, PaperExchange};
use ob_trader::feed::{ConnectionStatus, FeedEvent};
use ob_trader::notify::MemorySink;
use ob_trader::position::PositionState;
use ob_trader::signal::Direction;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

const CONFIG: &str = r#"
    [trading]
    symbol = "ETHUSD"
    product_id = 1699
    initial_capital = "10000"
    max_position_size_pct = "0.1"

    [strategy]
    sensitivity = "0.01"
    min_volume_percentile = "90"
    trend_period = 20
    min_trades_distance = 0
    bias = "any"

    [execution]
    order_timeout_ms = 500
    stop_retry_delay_ms = 1
"#;

/// Drives an engine one candle at a time with an open and a close trade
struct Market {
    engine: TradeEngine,
    paper: PaperExchange,
    bar: i64,
    price: Decimal,
    impulses: u32,
}

impl Market {
    async fn new() -> Self {
        let config = Config::from_toml_str(CONFIG).unwrap();
        let paper = PaperExchange::new(dec!(10000), dec!(0));
        let mut engine = TradeEngine::new(
            &config,
            Arc::new(paper.clone()),
            Arc::new(MemorySink::new()),
            None,
        );
        engine.startup().await;
        engine
            .handle_feed_event(FeedEvent::Status(ConnectionStatus::Connected))
            .await;
        Self {
            engine,
            paper,
            bar: 0,
            price: dec!(2000),
            impulses: 0,
        }
    }

    fn open_time(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(15 * self.bar)
    }

    async fn candle(&mut self, close: Decimal, volume: Decimal) {
        let t = self.open_time();
        let half = volume / dec!(2);
        self.engine
            .handle_feed_event(FeedEvent::Tick(Tick::new(self.price, half, t)))
            .await;
        self.engine
            .handle_feed_event(FeedEvent::Tick(Tick::new(close, half, t + Duration::minutes(10))))
            .await;
        self.price = close;
        self.bar += 1;
    }

    async fn quiet(&mut self, bars: usize) {
        for i in 0..bars {
            let close = if i % 2 == 0 { self.price + dec!(1) } else { self.price - dec!(1) };
            self.candle(close, dec!(10)).await;
        }
    }

    /// Small bearish candle
    async fn drift_down(&mut self) {
        let close = (self.price * dec!(0.998)).round_dp(2);
        self.candle(close, dec!(10)).await;
    }

    /// +2% candle on the highest volume seen so far
    async fn impulse_up(&mut self) {
        self.impulses += 1;
        let close = (self.price * dec!(1.02)).round_dp(2);
        let volume = dec!(100) + Decimal::from(self.impulses) * dec!(10);
        self.candle(close, volume).await;
    }

    async fn crash(&mut self) {
        let close = (self.price * dec!(0.95)).round_dp(2);
        self.candle(close, dec!(5)).await;
    }
}

fn assert_one_position_at_a_time(fills: &[Fill]) {
    let mut open = false;
    for fill in fills {
        if fill.reduce_only {
            assert!(open, "exit fill without an open position");
            open = false;
        } else {
            assert!(!open, "entry fill while a position was already open");
            open = true;
        }
    }
}

#[tokio::test]
async fn test_signals_while_open_never_add_a_position() {
    let mut market = Market::new().await;
    market.quiet(20).await;

    for _ in 0..12 {
        market.impulse_up().await;
        market.drift_down().await;
        market.drift_down().await;
    }

    let fills = market.paper.fills().await;
    let entries: Vec<&Fill> = fills.iter().filter(|f| !f.reduce_only).collect();
    assert_eq!(entries.len(), 1);
    assert_one_position_at_a_time(&fills);

    let snapshot = market.engine.snapshot();
    assert_eq!(snapshot.position_state, PositionState::Open);
    let position = snapshot.position.unwrap();
    assert_eq!(position.direction, Direction::Long);
    assert_eq!(market.engine.session().consumed_signal, Some(20));

    let exchange = tokio_test::assert_ok!(market.paper.get_position("ETHUSD").await).unwrap();
    assert_eq!(exchange.size, position.size);
    assert_eq!(exchange.size, entries[0].size);
}

#[tokio::test]
async fn test_reentry_only_after_exit() {
    let mut market = Market::new().await;
    market.quiet(20).await;

    for _ in 0..4 {
        market.impulse_up().await;
        market.drift_down().await;
        market.drift_down().await;
    }
    market.crash().await;
    assert_eq!(market.engine.snapshot().position_state, PositionState::Flat);

    market.drift_down().await;
    for _ in 0..3 {
        market.impulse_up().await;
        market.drift_down().await;
        market.drift_down().await;
    }

    let fills = market.paper.fills().await;
    assert_one_position_at_a_time(&fills);
    assert_eq!(fills.iter().filter(|f| !f.reduce_only).count(), 2);
    assert_eq!(fills.iter().filter(|f| f.reduce_only).count(), 1);

    let snapshot = market.engine.snapshot();
    assert_eq!(snapshot.position_state, PositionState::Open);
    assert_eq!(snapshot.stats.total_trades, 1);
}
