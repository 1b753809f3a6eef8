//! Delta Exchange `all_trades` feed

use super::{ConnectionStatus, FeedEvent, MarketDataFeed};
use crate::candle::{Tick, Timeframe};
use crate::config::Config;
use crate::execution::{with_timeout, CandleHistory};
use crate::ws::{WsClient, WsConfig, WsMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const REPLAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Public trade message
#[derive(Debug, Deserialize)]
struct TradeMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    symbol: String,
    price: Decimal,
    /// Contracts traded
    size: Decimal,
    /// Microseconds since epoch
    timestamp: i64,
}

/// Fetches the candles missed while disconnected
#[derive(Clone)]
struct Replayer {
    history: Arc<dyn CandleHistory>,
    symbol: String,
    timeframe: Timeframe,
}

impl Replayer {
    async fn fetch(&self, since: DateTime<Utc>) -> Option<FeedEvent> {
        let start = self.timeframe.floor(since);
        let end = Utc::now();
        match with_timeout(
            REPLAY_TIMEOUT,
            self.history.candles(&self.symbol, self.timeframe, start, end),
        )
        .await
        {
            Ok(candles) => {
                tracing::info!(count = candles.len(), %start, %end, "Replaying missed candles");
                metrics::counter!("feed_replayed_candles_total").increment(candles.len() as u64);
                Some(FeedEvent::Replay(candles))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Candle replay failed, gaps will be filled flat");
                None
            }
        }
    }
}

/// Delta Exchange trade feed for one symbol
pub struct DeltaFeed {
    symbol: String,
    channel: String,
    ws_config: WsConfig,
    buffer: usize,
    replayer: Option<Replayer>,
}

impl DeltaFeed {
    /// Create a feed from configuration.
    ///
    /// `history` enables replay after reconnects when set and replay is
    /// enabled in the feed section.
    pub fn new(config: &Config, history: Option<Arc<dyn CandleHistory>>) -> Self {
        let symbol = config.trading.symbol.clone();
        let channel = config.feed.channel.clone();
        let feed = &config.feed;

        let ws_config = WsConfig::new(feed.ws_url.clone())
            .subscribe(Self::subscribe_message(&channel, &symbol))
            .max_reconnects(feed.max_reconnect_attempts)
            .initial_delay(Duration::from_millis(feed.initial_backoff_ms))
            .max_delay(Duration::from_millis(feed.max_backoff_ms))
            .jitter(feed.backoff_jitter)
            .ping_interval(Duration::from_secs(feed.ping_interval_secs))
            .pong_timeout(Duration::from_secs(feed.pong_timeout_secs))
            .idle_timeout(Duration::from_secs(feed.idle_timeout_secs))
            .buffer(feed.channel_buffer);

        let replayer = history
            .filter(|_| feed.replay_enabled)
            .map(|history| Replayer {
                history,
                symbol: symbol.clone(),
                timeframe: config.trading.timeframe,
            });

        Self {
            symbol,
            channel,
            ws_config,
            buffer: feed.channel_buffer.max(1),
            replayer,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Subscription request sent after every connect
    fn subscribe_message(channel: &str, symbol: &str) -> String {
        json!({
            "type": "subscribe",
            "payload": {
                "channels": [{ "name": channel, "symbols": [symbol] }]
            }
        })
        .to_string()
    }

    /// Parse a trade message for `symbol`; anything else yields `None`
    fn parse_message(msg: &str, symbol: &str) -> Option<Tick> {
        let trade: TradeMessage = serde_json::from_str(msg).ok()?;
        if trade.kind != "all_trades" || !trade.symbol.eq_ignore_ascii_case(symbol) {
            return None;
        }
        if trade.price <= Decimal::ZERO {
            return None;
        }
        let timestamp = DateTime::from_timestamp_micros(trade.timestamp)?;
        Some(Tick::new(trade.price, trade.size.abs(), timestamp))
    }

    /// Translate socket messages into feed events
    async fn run_event_loop(
        mut ws_rx: mpsc::Receiver<WsMessage>,
        event_tx: mpsc::Sender<FeedEvent>,
        symbol: String,
        replayer: Option<Replayer>,
    ) {
        let mut last_tick_at: Option<DateTime<Utc>> = None;
        let mut interrupted = false;

        while let Some(msg) = ws_rx.recv().await {
            let event = match msg {
                WsMessage::Text(text) => match Self::parse_message(&text, &symbol) {
                    Some(tick) => {
                        last_tick_at = Some(tick.timestamp);
                        metrics::counter!("feed_ticks_total").increment(1);
                        FeedEvent::Tick(tick)
                    }
                    None => {
                        tracing::trace!(message = %text, "Ignoring non-trade message");
                        continue;
                    }
                },
                WsMessage::Binary(_) => continue,
                WsMessage::Connected => {
                    tracing::info!(%symbol, "Trade feed connected");
                    metrics::gauge!("feed_connected").set(1.0);
                    if event_tx
                        .send(FeedEvent::Status(ConnectionStatus::Connected))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    let replay = match (&replayer, last_tick_at) {
                        (Some(replayer), Some(since)) if interrupted => replayer.fetch(since).await,
                        _ => None,
                    };
                    interrupted = false;
                    match replay {
                        Some(event) => event,
                        None => continue,
                    }
                }
                WsMessage::Disconnected => {
                    tracing::warn!(%symbol, "Trade feed disconnected");
                    metrics::gauge!("feed_connected").set(0.0);
                    interrupted = true;
                    FeedEvent::Status(ConnectionStatus::Disconnected)
                }
                WsMessage::Reconnecting { attempt, delay } => {
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "Trade feed reconnecting");
                    metrics::counter!("feed_reconnects_total").increment(1);
                    interrupted = true;
                    FeedEvent::Status(ConnectionStatus::Reconnecting { attempt, delay })
                }
            };

            if event_tx.send(event).await.is_err() {
                tracing::debug!("Feed receiver dropped, stopping feed");
                break;
            }
        }
        tracing::info!(%symbol, "Trade feed stopped");
    }
}

#[async_trait]
impl MarketDataFeed for DeltaFeed {
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<FeedEvent>> {
        let (event_tx, event_rx) = mpsc::channel(self.buffer);
        tracing::info!(symbol = %self.symbol, channel = %self.channel, url = %self.ws_config.url, "Subscribing to trade feed");

        let ws_rx = WsClient::new(self.ws_config.clone()).connect();
        let symbol = self.symbol.clone();
        let replayer = self.replayer.clone();
        tokio::spawn(async move {
            Self::run_event_loop(ws_rx, event_tx, symbol, replayer).await;
        });

        Ok(event_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Candle;
    use crate::execution::ExchangeError;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FixedHistory {
        candles: Vec<Candle>,
        calls: Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl CandleHistory for FixedHistory {
        async fn candles(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Candle>, ExchangeError> {
            self.calls.lock().unwrap().push(start);
            Ok(self.candles.clone())
        }
    }

    fn trade(price: &str, ts_micros: i64) -> String {
        format!(
            r#"{{"symbol":"ETHUSD","price":"{price}","size":12,"type":"all_trades","timestamp":{ts_micros},"buyer_role":"taker"}}"#
        )
    }

    #[test]
    fn test_subscribe_message() {
        let msg: serde_json::Value =
            serde_json::from_str(&DeltaFeed::subscribe_message("all_trades", "ETHUSD")).unwrap();
        assert_eq!(msg["type"], "subscribe");
        assert_eq!(msg["payload"]["channels"][0]["name"], "all_trades");
        assert_eq!(msg["payload"]["channels"][0]["symbols"][0], "ETHUSD");
    }

    #[test]
    fn test_parse_trade() {
        let tick = DeltaFeed::parse_message(&trade("2450.5", 1_704_067_200_123_456), "ETHUSD").unwrap();
        assert_eq!(tick.price, dec!(2450.5));
        assert_eq!(tick.volume, dec!(12));
        assert_eq!(tick.timestamp.timestamp_micros(), 1_704_067_200_123_456);
    }

    #[test]
    fn test_parse_ignores_other_messages() {
        let snapshot = r#"{"type":"all_trades_snapshot","symbol":"ETHUSD","trades":[]}"#;
        assert!(DeltaFeed::parse_message(snapshot, "ETHUSD").is_none());
        assert!(DeltaFeed::parse_message(r#"{"type":"subscriptions","channels":[]}"#, "ETHUSD").is_none());
        assert!(DeltaFeed::parse_message(&trade("2450", 1), "BTCUSD").is_none());
        assert!(DeltaFeed::parse_message(&trade("abc", 1), "ETHUSD").is_none());
        assert!(DeltaFeed::parse_message("not json", "ETHUSD").is_none());
    }

    #[tokio::test]
    async fn test_event_loop_replays_after_reconnect() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let replayed = vec![Candle {
            open_time: t0,
            open: dec!(2000),
            high: dec!(2010),
            low: dec!(1990),
            close: dec!(2005),
            volume: dec!(100),
            closed: true,
        }];
        let history = Arc::new(FixedHistory {
            candles: replayed.clone(),
            calls: Mutex::new(Vec::new()),
        });
        let replayer = Replayer {
            history: history.clone(),
            symbol: "ETHUSD".to_string(),
            timeframe: "15m".parse().unwrap(),
        };

        let (ws_tx, ws_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let handle = tokio::spawn(DeltaFeed::run_event_loop(
            ws_rx,
            event_tx,
            "ETHUSD".to_string(),
            Some(replayer),
        ));

        let first_ts = (t0 + chrono::Duration::minutes(5)).timestamp_micros();
        ws_tx.send(WsMessage::Connected).await.unwrap();
        ws_tx.send(WsMessage::Text(trade("2000", first_ts))).await.unwrap();
        ws_tx.send(WsMessage::Disconnected).await.unwrap();
        ws_tx
            .send(WsMessage::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(10),
            })
            .await
            .unwrap();
        ws_tx.send(WsMessage::Connected).await.unwrap();
        ws_tx.send(WsMessage::Text(trade("2010", first_ts + 1))).await.unwrap();
        drop(ws_tx);

        let mut events = Vec::new();
        while let Some(event) = event_rx.recv().await {
            events.push(event);
        }
        handle.await.unwrap();

        assert_eq!(events.len(), 7);
        assert!(matches!(events[0], FeedEvent::Status(ConnectionStatus::Connected)));
        assert!(matches!(events[1], FeedEvent::Tick(_)));
        assert!(matches!(events[2], FeedEvent::Status(ConnectionStatus::Disconnected)));
        assert!(matches!(events[3], FeedEvent::Status(ConnectionStatus::Reconnecting { attempt: 1, .. })));
        assert!(matches!(events[4], FeedEvent::Status(ConnectionStatus::Connected)));
        match &events[5] {
            FeedEvent::Replay(candles) => assert_eq!(candles, &replayed),
            other => panic!("expected replay, got {other:?}"),
        }
        assert!(matches!(&events[6], FeedEvent::Tick(t) if t.price == dec!(2010)));

        // Replay starts at the interval of the last tick seen
        assert_eq!(history.calls.lock().unwrap().as_slice(), &[t0]);
    }

    #[tokio::test]
    async fn test_first_connect_does_not_replay() {
        let history = Arc::new(FixedHistory {
            candles: Vec::new(),
            calls: Mutex::new(Vec::new()),
        });
        let replayer = Replayer {
            history: history.clone(),
            symbol: "ETHUSD".to_string(),
            timeframe: "15m".parse().unwrap(),
        };
        let (ws_tx, ws_rx) = mpsc::channel(4);
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let handle = tokio::spawn(DeltaFeed::run_event_loop(
            ws_rx,
            event_tx,
            "ETHUSD".to_string(),
            Some(replayer),
        ));

        ws_tx.send(WsMessage::Connected).await.unwrap();
        drop(ws_tx);
        assert!(matches!(
            event_rx.recv().await,
            Some(FeedEvent::Status(ConnectionStatus::Connected))
        ));
        assert!(event_rx.recv().await.is_none());
        handle.await.unwrap();
        assert!(history.calls.lock().unwrap().is_empty());
    }
}
