//! Run command implementation

use crate::config::{Config, ExecutionMode};
use crate::engine::TradeEngine;
use crate::execution::{CandleHistory, DeltaClient, Exchange, PaperExchange};
use crate::feed::{DeltaFeed, MarketDataFeed};
use crate::journal::TradeJournal;
use crate::notify::{LogSink, NotificationSink, TelegramSink};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Simulate fills locally even if live mode is configured
    #[arg(long)]
    pub paper: bool,

    /// Override the trade journal path
    #[arg(long)]
    pub journal: Option<PathBuf>,
}

impl RunArgs {
    /// Apply command line overrides to `config`
    pub fn apply(&self, config: &mut Config) {
        if self.paper {
            config.execution.mode = ExecutionMode::Paper;
        }
        if let Some(path) = &self.journal {
            config.journal.path = path.clone();
        }
    }

    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        self.apply(&mut config);
        config.validate()?;

        let client = Arc::new(DeltaClient::new(&config.exchange, &config.trading)?);
        let exchange: Arc<dyn Exchange> = match config.execution.mode {
            ExecutionMode::Paper => Arc::new(PaperExchange::new(
                config.trading.initial_capital,
                config.execution.paper_slippage,
            )),
            ExecutionMode::Live => client.clone(),
        };

        let notifier: Arc<dyn NotificationSink> = if config.notify.enabled {
            Arc::new(TelegramSink::spawn(&config.notify)?)
        } else {
            Arc::new(LogSink)
        };

        let journal = if config.journal.enabled {
            Some(TradeJournal::open(config.journal.path.clone()).await?)
        } else {
            None
        };

        let history: Arc<dyn CandleHistory> = client;
        let feed = DeltaFeed::new(&config, Some(history));
        let feed_rx = feed.subscribe().await?;

        tracing::info!(
            symbol = %config.trading.symbol,
            mode = ?config.execution.mode,
            timeframe = %config.trading.timeframe,
            "Starting trading engine"
        );

        let engine = TradeEngine::new(&config, exchange, notifier, journal);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut engine_task = tokio::spawn(engine.run(feed_rx, shutdown_rx));

        let snapshot = tokio::select! {
            result = &mut engine_task => result??,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
                shutdown_tx.send_replace(true);
                engine_task.await??
            }
        };

        tracing::info!(
            position = snapshot.position_state.as_str(),
            trades = snapshot.stats.total_trades,
            pnl = %snapshot.stats.total_pnl,
            "Stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_flag_overrides_live_mode() {
        let mut config = Config::from_toml_str(
            r#"
            [trading]
            symbol = "ETHUSD"
            product_id = 1699
            initial_capital = 100

            [execution]
            mode = "live"
            "#,
        )
        .unwrap();
        let args = RunArgs {
            paper: true,
            journal: Some(PathBuf::from("/tmp/journal.jsonl")),
        };
        args.apply(&mut config);
        assert_eq!(config.execution.mode, ExecutionMode::Paper);
        assert_eq!(config.journal.path, PathBuf::from("/tmp/journal.jsonl"));
        config.validate().unwrap();
    }
}
