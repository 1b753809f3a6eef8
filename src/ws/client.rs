//! WebSocket client with automatic reconnection

use super::backoff::Backoff;
use super::types::{WsConfig, WsError, WsMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Reusable WebSocket client with automatic reconnection and ping/pong handling
pub struct WsClient {
    config: WsConfig,
}

/// Why a single connection ended
enum SessionEnd {
    /// Receiver dropped; stop for good
    ReceiverGone,
    /// Connection was up, then failed
    Dropped(WsError),
    /// Could not connect at all
    ConnectFailed(WsError),
}

impl WsClient {
    /// Create a new WebSocket client with the given configuration
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Create a new client with just a URL using default config
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(WsConfig::new(url))
    }

    /// Get the configured URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Connect and return a receiver for messages
    ///
    /// This spawns a background task that handles connection management,
    /// automatic reconnection with jittered exponential backoff, resubscription
    /// and ping/pong keepalive.
    ///
    /// The receiver gets every text frame plus connection status events
    /// (Connected, Disconnected, Reconnecting). Dropping it stops the task.
    pub fn connect(&self) -> mpsc::Receiver<WsMessage> {
        let (tx, rx) = mpsc::channel(self.config.channel_buffer.max(1));
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::run_connection_loop(config, tx).await {
                tracing::error!(error = %e, "WebSocket connection loop failed");
            }
        });

        rx
    }

    /// Run the connection loop with automatic reconnection
    async fn run_connection_loop(
        config: WsConfig,
        tx: mpsc::Sender<WsMessage>,
    ) -> Result<(), WsError> {
        let mut backoff = Backoff::new(
            config.initial_reconnect_delay,
            config.max_reconnect_delay,
            config.reconnect_jitter,
        );

        loop {
            let error = match Self::connect_and_stream(&config, &tx, &mut backoff).await {
                SessionEnd::ReceiverGone => {
                    tracing::debug!("Receiver dropped, stopping WebSocket task");
                    return Ok(());
                }
                SessionEnd::Dropped(e) => {
                    metrics::counter!("ws_disconnects_total").increment(1);
                    if tx.send(WsMessage::Disconnected).await.is_err() {
                        return Ok(());
                    }
                    e
                }
                SessionEnd::ConnectFailed(e) => e,
            };

            if let Some(max) = config.max_reconnect_attempts {
                if backoff.attempt() >= max {
                    tracing::error!(attempts = backoff.attempt(), "Max reconnection attempts reached");
                    let _ = tx.send(WsMessage::Disconnected).await;
                    return Err(WsError::MaxReconnectsExceeded);
                }
            }

            let delay = backoff.next_delay();
            let attempt = backoff.attempt();
            tracing::warn!(
                error = %error,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "WebSocket connection error, reconnecting..."
            );

            if tx
                .send(WsMessage::Reconnecting { attempt, delay })
                .await
                .is_err()
            {
                return Ok(());
            }

            sleep(delay).await;
        }
    }

    /// Connect, subscribe and stream messages until the connection ends
    async fn connect_and_stream(
        config: &WsConfig,
        tx: &mpsc::Sender<WsMessage>,
        backoff: &mut Backoff,
    ) -> SessionEnd {
        tracing::info!(url = %config.url, "Connecting to WebSocket");

        let ws_stream = match connect_async(config.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => return SessionEnd::ConnectFailed(WsError::ConnectionFailed(e.to_string())),
        };

        let (mut write, mut read) = ws_stream.split();

        for subscription in &config.subscriptions {
            if let Err(e) = write.send(Message::Text(subscription.clone())).await {
                return SessionEnd::ConnectFailed(WsError::SendFailed(e.to_string()));
            }
        }

        tracing::info!(subscriptions = config.subscriptions.len(), "WebSocket connected");
        backoff.reset();

        if tx.send(WsMessage::Connected).await.is_err() {
            return SessionEnd::ReceiverGone;
        }

        let mut ping_interval = tokio::time::interval(config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ping_interval.tick().await;

        let idle = sleep(config.idle_timeout);
        tokio::pin!(idle);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let pong_wait = async {
                match pong_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                msg = read.next() => {
                    idle.as_mut().reset(Instant::now() + config.idle_timeout);
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if tx.send(WsMessage::Text(text)).await.is_err() {
                                return SessionEnd::ReceiverGone;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if tx.send(WsMessage::Binary(data)).await.is_err() {
                                return SessionEnd::ReceiverGone;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return SessionEnd::Dropped(WsError::SendFailed(e.to_string()));
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            pong_deadline = None;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Received close frame");
                            return SessionEnd::Dropped(WsError::ClosedByServer);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return SessionEnd::Dropped(WsError::ConnectionFailed(e.to_string()));
                        }
                        None => {
                            return SessionEnd::Dropped(WsError::ConnectionFailed(
                                "Stream ended unexpectedly".into(),
                            ));
                        }
                    }
                }

                _ = &mut idle => {
                    return SessionEnd::Dropped(WsError::IdleTimeout(config.idle_timeout));
                }

                _ = pong_wait => {
                    return SessionEnd::Dropped(WsError::PongTimeout);
                }

                _ = ping_interval.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        return SessionEnd::Dropped(WsError::SendFailed(e.to_string()));
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + config.pong_timeout);
                    }
                }

                _ = tx.closed() => {
                    return SessionEnd::ReceiverGone;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ws_client_creation() {
        let client = WsClient::with_url("wss://example.com");
        assert_eq!(client.url(), "wss://example.com");
    }

    #[test]
    fn test_ws_client_with_config() {
        let config = WsConfig::new("wss://test.com")
            .max_reconnects(Some(5))
            .ping_interval(Duration::from_secs(15));

        let client = WsClient::new(config);
        assert_eq!(client.url(), "wss://test.com");
        assert_eq!(client.config.max_reconnect_attempts, Some(5));
        assert_eq!(client.config.ping_interval, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_ws_client_connection_failure() {
        // Nothing listens on port 1
        let client = WsClient::new(
            WsConfig::new("ws://127.0.0.1:1")
                .max_reconnects(Some(2))
                .initial_delay(Duration::from_millis(10))
                .max_delay(Duration::from_millis(40)),
        );

        let mut rx = client.connect();

        let mut reconnects = Vec::new();
        let mut got_disconnect = false;
        let timeout = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WsMessage::Disconnected => {
                        got_disconnect = true;
                        break;
                    }
                    WsMessage::Reconnecting { attempt, delay } => reconnects.push((attempt, delay)),
                    _ => {}
                }
            }
        });

        timeout.await.expect("Test timed out");
        assert!(got_disconnect, "Should receive Disconnected message");
        assert_eq!(reconnects.len(), 2);
        assert_eq!(reconnects[0].0, 1);
        assert_eq!(reconnects[1].0, 2);
        for (_, delay) in reconnects {
            assert!(delay <= Duration::from_millis(40));
        }
    }
}
