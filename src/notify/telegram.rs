//! Telegram Bot API sink

use super::{NotificationSink, NotifyCategory};
use crate::config::NotifyConfig;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends notifications through a bounded queue drained by a worker task
#[derive(Debug, Clone)]
pub struct TelegramSink {
    tx: mpsc::Sender<(NotifyCategory, String)>,
}

impl TelegramSink {
    /// Spawn the worker; requires a running tokio runtime
    pub fn spawn(config: &NotifyConfig) -> anyhow::Result<Self> {
        if config.bot_token.is_empty() || config.chat_id.is_empty() {
            anyhow::bail!("Telegram notifications need bot_token and chat_id");
        }
        let client = Client::builder().timeout(SEND_TIMEOUT).build()?;
        let url = format!(
            "{}/bot{}/sendMessage",
            config.api_url.trim_end_matches('/'),
            config.bot_token
        );
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let chat_id = config.chat_id.clone();

        tokio::spawn(async move {
            Self::run_worker(rx, client, url, chat_id).await;
        });

        Ok(Self { tx })
    }

    async fn run_worker(
        mut rx: mpsc::Receiver<(NotifyCategory, String)>,
        client: Client,
        url: String,
        chat_id: String,
    ) {
        while let Some((category, text)) = rx.recv().await {
            let body = json!({ "chat_id": chat_id, "text": text });
            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    metrics::counter!("notifications_sent_total", "category" => category.as_str())
                        .increment(1);
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    tracing::error!(%status, %detail, "Telegram rejected notification");
                }
                Err(e) => {
                    // Never log the URL; it carries the bot token
                    tracing::error!(error = %e.without_url(), "Failed to send Telegram notification");
                }
            }
        }
        tracing::debug!("Telegram worker stopped");
    }
}

impl NotificationSink for TelegramSink {
    fn notify(&self, message: String, category: NotifyCategory) {
        if let Err(e) = self.tx.try_send((category, message)) {
            metrics::counter!("notifications_dropped_total").increment(1);
            tracing::warn!(category = category.as_str(), error = %e, "Notification dropped");
        }
    }
}
