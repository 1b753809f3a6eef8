//! End-to-end integration tests
//!
//! A local WebSocket server plays the exchange trade feed; fills go to the
//! paper exchange and missed candles come from an in-memory history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use ob_trader::candle::{Candle, Timeframe};
use ob_trader::config::Config;
use ob_trader::engine::TradeEngine;
use ob_trader::execution::{CandleHistory, Exchange, ExchangeError, PaperExchange};
use ob_trader::feed::{DeltaFeed, MarketDataFeed};
use ob_trader::journal::{read_journal, TradeJournal};
use ob_trader::notify::{MemorySink, NotifyCategory};
use ob_trader::position::PositionState;
use ob_trader::signal::Direction;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

struct FixedHistory(Vec<Candle>);

#[async_trait]
impl CandleHistory for FixedHistory {
    async fn candles(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        Ok(self.0.clone())
    }
}

/// Quiet candles then a -2% impulse on ten times the volume, ending one
/// interval before the current one
fn short_setup(tf: Timeframe) -> Vec<Candle> {
    let base = tf.floor(Utc::now()) - tf.duration() * 21;
    (0..20)
        .map(|i| {
            let (open, close, volume) = match i {
                19 => (dec!(2000), dec!(1960), dec!(100)),
                i if i % 2 == 0 => (dec!(2000), dec!(2002), dec!(10)),
                _ => (dec!(2000), dec!(1998), dec!(10)),
            };
            Candle {
                open_time: base + tf.duration() * i,
                open,
                high: open.max(close) + dec!(1),
                low: open.min(close) - dec!(1),
                close,
                volume,
                closed: true,
            }
        })
        .collect()
}

fn trade(price: Decimal, at: DateTime<Utc>) -> Message {
    Message::Text(
        serde_json::json!({
            "type": "all_trades",
            "symbol": "ETHUSD",
            "price": price.to_string(),
            "size": "10",
            "timestamp": at.timestamp_micros(),
        })
        .to_string(),
    )
}

/// First connection sends one old trade and hangs up; the second streams
/// the trades that trail the stop and then cross it.
async fn spawn_exchange_feed(first_trade_at: DateTime<Utc>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            connection += 1;
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            // Subscription request
            let _ = ws.next().await;

            if connection == 1 {
                ws.send(trade(dec!(2000), first_trade_at)).await.unwrap();
                ws.close(None).await.ok();
                continue;
            }

            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ws.send(trade(dec!(1900), Utc::now())).await.unwrap();
                ws.send(trade(dec!(1930), Utc::now())).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });
    addr
}

fn config(addr: SocketAddr, journal: &std::path::Path) -> Config {
    let toml = format!(
        r#"
        [trading]
        symbol = "ETHUSD"
        product_id = 1699
        initial_capital = "10000"
        max_position_size_pct = "0.1"

        [strategy]
        sensitivity = "0.01"
        min_volume_percentile = "90"
        min_trades_distance = 0
        bias = "any"

        [feed]
        ws_url = "ws://{addr}"
        initial_backoff_ms = 10
        max_backoff_ms = 50

        [execution]
        order_timeout_ms = 1000
        stop_retry_delay_ms = 1

        [engine]
        reconcile_interval_secs = 3600
        seal_interval_secs = 3600
        shutdown_grace_secs = 1

        [journal]
        path = "{}"
        "#,
        journal.display()
    );
    let config = Config::from_toml_str(&toml).unwrap();
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn test_reconnect_replay_entry_trail_and_exit() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("trades.jsonl");
    let tf = Timeframe::default();
    let first_trade_at = tf.floor(Utc::now()) - tf.duration() * 22 + chrono::Duration::seconds(60);

    let addr = spawn_exchange_feed(first_trade_at).await;
    let config = config(addr, &journal_path);

    let paper = PaperExchange::new(dec!(10000), dec!(0));
    let sink = MemorySink::new();
    let journal = TradeJournal::open(journal_path.clone()).await.unwrap();
    let history: Arc<dyn CandleHistory> = Arc::new(FixedHistory(short_setup(tf)));

    let feed_rx = DeltaFeed::new(&config, Some(history))
        .subscribe()
        .await
        .unwrap();
    let engine = TradeEngine::new(&config, Arc::new(paper.clone()), Arc::new(sink.clone()), Some(journal));
    let mut snapshots = engine.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(engine.run(feed_rx, shutdown_rx));

    tokio::time::timeout(
        Duration::from_secs(10),
        snapshots.wait_for(|s| s.stats.total_trades == 1),
    )
    .await
    .expect("trade never completed")
    .unwrap();

    shutdown_tx.send(true).unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("engine did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.position_state, PositionState::Flat);
    assert_eq!(snapshot.stats.total_pnl, dec!(15.30));
    assert!(paper.get_position("ETHUSD").await.unwrap().is_none());

    let fills = paper.fills().await;
    assert_eq!(fills.len(), 2);
    assert!(!fills[0].reduce_only);
    assert_eq!(fills[0].price, dec!(1960));
    assert!(fills[1].reduce_only);
    assert_eq!(fills[1].price, dec!(1930));

    let records = read_journal(&journal_path).await.unwrap();
    let kinds: Vec<&str> = records.iter().map(|r| r.event.kind()).collect();
    assert_eq!(kinds[..3], ["entry", "stop_update", "exit"]);
    match &records[0].event {
        ob_trader::journal::JournalEvent::Entry { position } => {
            assert_eq!(position.direction, Direction::Short);
            assert_eq!(position.size, dec!(0.51));
        }
        other => panic!("unexpected first record {other:?}"),
    }

    let messages = sink.messages();
    assert!(messages.iter().any(|(_, m)| m == "Market data reconnected"));
    assert_eq!(sink.count(NotifyCategory::StopUpdate), 1);
    assert!(messages
        .iter()
        .any(|(c, m)| *c == NotifyCategory::Trade && m.starts_with("Position closed (stop_loss)")));
}
