//! Trade engine
//!
//! Single writer over the trading session. Feed events, reconciliation
//! reports, the candle seal timer and shutdown are handled one at a time in
//! arrival order; readers observe the session through published snapshots.

use super::{ReconcileReport, ReconciliationPoller, SessionSnapshot, TradingSession};
use crate::candle::{Candle, Tick};
use crate::config::{Config, ExecutionMode};
use crate::error::{ErrorKind, TradingError};
use crate::execution::{with_timeout, Exchange};
use crate::feed::{ConnectionStatus, FeedEvent};
use crate::journal::{open_position, read_journal, JournalEvent, TradeJournal, TradeStats};
use crate::notify::{
    format_entry, format_error, format_exit, format_reconciliation, format_recovery,
    format_startup, format_stats, format_stop_update, NotificationSink, NotifyCategory,
};
use crate::position::{
    ClosedTrade, ExitReason, ManagerConfig, Position, PositionError, PositionManager,
    ReconcileOutcome, TickAction,
};
use crate::risk::{AccountState, RiskSizer};
use crate::signal::{DetectorConfig, OrderBlockDetector};
use crate::telemetry::set_decimal_gauge;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Engine timing and policy settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub symbol: String,
    pub mode: ExecutionMode,
    pub initial_capital: Decimal,
    pub min_trade_interval_secs: u64,
    pub order_timeout: Duration,
    pub reconcile_interval: Duration,
    pub shutdown_grace: Duration,
    pub seal_interval: Duration,
    pub event_buffer: usize,
    pub close_on_shutdown: bool,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            symbol: config.trading.symbol.clone(),
            mode: config.execution.mode,
            initial_capital: config.trading.initial_capital,
            min_trade_interval_secs: config.strategy.min_trade_interval_secs,
            order_timeout: Duration::from_millis(config.execution.order_timeout_ms),
            reconcile_interval: Duration::from_secs(config.engine.reconcile_interval_secs.max(1)),
            shutdown_grace: Duration::from_secs(config.engine.shutdown_grace_secs),
            seal_interval: Duration::from_secs(config.engine.seal_interval_secs.max(1)),
            event_buffer: config.engine.event_buffer,
            close_on_shutdown: config.engine.close_on_shutdown,
        }
    }
}

/// Orchestrates detection, sizing and the position lifecycle
pub struct TradeEngine {
    settings: EngineSettings,
    session: TradingSession,
    detector: OrderBlockDetector,
    sizer: RiskSizer,
    exchange: Arc<dyn Exchange>,
    poller: ReconciliationPoller,
    notifier: Arc<dyn NotificationSink>,
    journal: Option<TradeJournal>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl TradeEngine {
    pub fn new(
        config: &Config,
        exchange: Arc<dyn Exchange>,
        notifier: Arc<dyn NotificationSink>,
        journal: Option<TradeJournal>,
    ) -> Self {
        let settings = EngineSettings::from(config);
        let detector = OrderBlockDetector::new(
            DetectorConfig::from(&config.strategy),
            config.trading.timeframe,
        );
        let manager = PositionManager::new(ManagerConfig::from(config), exchange.clone());
        let session = TradingSession::new(
            detector.window_capacity(),
            config.trading.timeframe,
            manager,
        );
        let poller = ReconciliationPoller::new(
            exchange.clone(),
            settings.symbol.clone(),
            settings.reconcile_interval,
            settings.order_timeout,
        );
        let (snapshot_tx, _) = watch::channel(session.snapshot());

        Self {
            settings,
            session,
            detector,
            sizer: RiskSizer::from_config(&config.trading),
            exchange,
            poller,
            notifier,
            journal,
            snapshot_tx,
        }
    }

    /// Receiver of session snapshots, updated after every mutation
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn session(&self) -> &TradingSession {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.session.snapshot());
    }

    fn notify(&self, message: String, category: NotifyCategory) {
        self.notifier.notify(message, category);
    }

    fn journal(&self, event: JournalEvent) {
        if let Some(journal) = &self.journal {
            journal.record(event);
        }
    }

    /// Run until the feed ends or `shutdown` fires, then shut down cleanly
    pub async fn run(
        mut self,
        mut feed: mpsc::Receiver<FeedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<SessionSnapshot> {
        self.startup().await;

        let (mut reports, poller_handle) = self
            .poller
            .clone()
            .spawn(self.settings.event_buffer, shutdown.clone());
        let mut seal = tokio::time::interval_at(
            tokio::time::Instant::now() + self.settings.seal_interval,
            self.settings.seal_interval,
        );
        seal.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown requested");
                        break;
                    }
                }
                event = feed.recv() => match event {
                    Some(event) => self.handle_feed_event(event).await,
                    None => {
                        tracing::warn!("Market data feed ended");
                        break;
                    }
                },
                Some(report) = reports.recv() => self.handle_report(report).await,
                _ = seal.tick() => self.handle_seal(Utc::now()).await,
            }
        }

        drop(reports);
        poller_handle.abort();
        Ok(self.shutdown().await)
    }

    /// Statistics and last open position recorded by the journal
    async fn load_journal(&mut self) -> Option<Position> {
        let journal = self.journal.as_ref()?;
        match read_journal(journal.path()).await {
            Ok(records) => {
                self.session.stats = TradeStats::from_records(&records);
                let open = open_position(&records);
                tracing::info!(
                    records = records.len(),
                    trades = self.session.stats.total_trades,
                    open = open.is_some(),
                    "Loaded trade journal"
                );
                open
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %journal.path().display(), "Cannot read trade journal");
                None
            }
        }
    }

    /// Initial reconciliation: read balance and adopt any exchange position
    pub async fn startup(&mut self) {
        let journaled = self.load_journal().await;
        let report = self.poller.poll_once().await;
        let account = report.account.as_ref().ok().copied();
        if let Some(account) = account {
            self.set_account(account);
        }

        match report.position {
            Ok(snapshot) => {
                let outcome = self.session.manager.startup_sync(snapshot, journaled, report.at);
                self.handle_outcome(outcome).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot read exchange position at startup");
                self.session.manager.mark_unknown();
                self.raise(TradingError::from(e));
            }
        }

        self.notify(
            format_startup(
                self.settings.mode,
                &self.settings.symbol,
                self.settings.initial_capital,
                account.as_ref(),
            ),
            NotifyCategory::Startup,
        );
        tracing::info!(
            symbol = %self.settings.symbol,
            mode = ?self.settings.mode,
            window = self.session.window.capacity(),
            "Engine started"
        );
        self.publish();
    }

    /// Apply one market data event
    pub async fn handle_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Tick(tick) => self.handle_tick(tick).await,
            FeedEvent::Status(status) => self.handle_status(status),
            FeedEvent::Replay(candles) => {
                let sealed = self.session.aggregator.backfill(&candles, Utc::now());
                tracing::info!(received = candles.len(), accepted = sealed.len(), "Applying replayed candles");
                self.process_candles(sealed).await;
            }
        }
        self.publish();
    }

    async fn handle_tick(&mut self, tick: Tick) {
        self.session.last_price = Some(tick.price);
        let sealed = self.session.aggregator.ingest(&tick);
        self.process_candles(sealed).await;
        self.evaluate_stop(tick.price).await;
    }

    fn handle_status(&mut self, status: ConnectionStatus) {
        self.session.connection = status;
        match status {
            ConnectionStatus::Connected => {
                let recovered = self.session.alerts.clear(ErrorKind::Connectivity);
                if !self.session.connected_once {
                    self.notify(
                        format!("Connected to market data for {}", self.settings.symbol),
                        NotifyCategory::Connection,
                    );
                } else if recovered {
                    self.notify("Market data reconnected".to_string(), NotifyCategory::Connection);
                }
                self.session.connected_once = true;
            }
            ConnectionStatus::Disconnected => {
                if self.session.alerts.raise(ErrorKind::Connectivity) {
                    self.notify(
                        "Market data disconnected, entries paused".to_string(),
                        NotifyCategory::Connection,
                    );
                }
            }
            ConnectionStatus::Reconnecting { attempt, delay } => {
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Waiting to reconnect");
                // Covers connects that fail before any session was established
                if self.session.alerts.raise(ErrorKind::Connectivity) {
                    metrics::counter!("trading_errors_total", "kind" => ErrorKind::Connectivity.as_str()).increment(1);
                    self.notify(
                        format!("Cannot reach market data (attempt {attempt}), entries paused"),
                        NotifyCategory::Connection,
                    );
                }
            }
        }
    }

    /// Seal quiet intervals, retry a refused exit and a lagging exchange stop
    pub async fn handle_seal(&mut self, now: DateTime<Utc>) {
        let sealed = self.session.aggregator.seal_due(now);
        let mut changed = !sealed.is_empty();
        self.process_candles(sealed).await;
        if self.session.manager.release_exit_hold() {
            if let Some(price) = self.session.last_price {
                self.evaluate_stop(price).await;
                changed = true;
            }
        }
        if self.session.manager.stop_pending() {
            self.sync_stop().await;
        }
        if changed {
            self.publish();
        }
    }

    /// Push closed candles; only the newest of a batch may trigger an entry
    async fn process_candles(&mut self, candles: Vec<Candle>) {
        let count = candles.len();
        for (i, candle) in candles.into_iter().enumerate() {
            let index = self.session.window.push(candle);
            metrics::counter!("candles_closed_total").increment(1);
            tracing::debug!(index, "Candle closed");
            if i + 1 == count {
                self.try_entry().await;
            }
        }
    }

    async fn try_entry(&mut self) {
        let spacing = self.session.manager.spacing();
        let Some(signal) = self
            .detector
            .detect(&self.session.window, spacing.last_trade_candle_index)
        else {
            return;
        };
        metrics::counter!("signals_total", "direction" => signal.direction.as_str()).increment(1);
        tracing::info!(
            direction = %signal.direction,
            impulse = signal.impulse_candle_index,
            block_low = %signal.range.low,
            block_high = %signal.range.high,
            volume_pct = %signal.volume_percentile,
            "Order block detected"
        );

        if self.session.signal_consumed(signal.impulse_candle_index) {
            tracing::debug!(impulse = signal.impulse_candle_index, "Signal already consumed");
            return;
        }
        if let Some(reason) = self.session.entries_paused() {
            tracing::info!(?reason, "Entries paused, signal skipped");
            return;
        }
        if !self.session.manager.is_flat() {
            tracing::debug!(state = self.session.manager.state().as_str(), "Position slot busy, signal skipped");
            return;
        }
        let now = Utc::now();
        if !spacing.interval_elapsed(now, self.settings.min_trade_interval_secs) {
            tracing::info!("Minimum trade interval not elapsed, signal skipped");
            return;
        }
        self.session.consumed_signal = Some(signal.impulse_candle_index);

        let account = match self.session.account {
            Some(account) => account,
            None => match with_timeout(self.settings.order_timeout, self.exchange.get_balance()).await {
                Ok(account) => {
                    self.set_account(account);
                    account
                }
                Err(e) => {
                    self.raise(e.into());
                    return;
                }
            },
        };

        let sized = match self.sizer.size(&signal, &account) {
            Ok(sized) => sized,
            Err(e) => {
                self.raise(e.into());
                return;
            }
        };

        let candle_index = self.session.window.latest_index();
        match self
            .session
            .manager
            .submit_entry(signal.direction, &sized, candle_index, now)
            .await
        {
            Ok(position) => {
                self.session.alerts.clear(ErrorKind::OrderRejection);
                self.session.alerts.clear(ErrorKind::InsufficientMargin);
                self.journal(JournalEvent::Entry {
                    position: position.clone(),
                });
                self.notify(format_entry(&position), NotifyCategory::Trade);
                self.sync_stop().await;
            }
            Err(e) => self.raise(e.into()),
        }
    }

    async fn evaluate_stop(&mut self, price: Decimal) {
        match self.session.manager.on_price_tick(price) {
            TickAction::None => {}
            TickAction::StopRaised { previous, stop_price } => {
                if let Some(position) = self.session.manager.position() {
                    self.journal(JournalEvent::StopUpdate {
                        position_id: position.id,
                        previous,
                        stop_price,
                    });
                    self.notify(format_stop_update(position, previous), NotifyCategory::StopUpdate);
                }
                self.sync_stop().await;
            }
            TickAction::StopTriggered { stop_price } => {
                tracing::info!(%price, %stop_price, "Stop crossed, exiting");
                self.exit(ExitReason::StopLoss, Some(price)).await;
            }
        }
    }

    async fn sync_stop(&mut self) {
        match self.session.manager.sync_stop().await {
            Ok(_) => {
                if self.session.alerts.clear(ErrorKind::StopModification) {
                    self.notify(format_recovery(ErrorKind::StopModification), NotifyCategory::Error);
                }
            }
            Err(PositionError::NotOpen) => {}
            Err(e) => self.raise(e.into()),
        }
    }

    async fn exit(&mut self, reason: ExitReason, price: Option<Decimal>) {
        let candle_index = self.session.window.latest_index();
        match self
            .session
            .manager
            .exit(reason, price, candle_index, Utc::now())
            .await
        {
            Ok(trade) => self.on_closed_trade(trade),
            Err(e) => {
                self.raise(e.into());
                if self.session.manager.stop_pending() {
                    self.sync_stop().await;
                }
            }
        }
    }

    fn on_closed_trade(&mut self, trade: ClosedTrade) {
        self.session.stats.record(&trade);
        set_decimal_gauge("realized_pnl", self.session.stats.total_pnl);
        self.notify(format_exit(&trade), NotifyCategory::Trade);
        self.notify(
            format_stats(&self.session.stats, self.session.account.map(|a| a.balance)),
            NotifyCategory::Trade,
        );
        self.journal(JournalEvent::Exit { trade });
    }

    /// Apply a balance and position poll
    pub async fn handle_report(&mut self, report: ReconcileReport) {
        match report.account {
            Ok(account) => self.set_account(account),
            Err(e) => tracing::warn!(error = %e, "Balance poll failed"),
        }
        match report.position {
            Ok(snapshot) => {
                let outcome = self.session.manager.apply_reconciliation(
                    snapshot,
                    self.session.window.latest_index(),
                    report.at,
                );
                self.handle_outcome(outcome).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Position poll failed");
                self.raise(e.into());
            }
        }
        self.publish();
    }

    async fn handle_outcome(&mut self, outcome: ReconcileOutcome) {
        metrics::counter!("reconciliations_total", "outcome" => outcome_name(&outcome)).increment(1);
        let text = format_reconciliation(&outcome);
        if let Some(detail) = &text {
            self.journal(JournalEvent::Reconciliation {
                outcome: outcome_name(&outcome).to_string(),
                detail: detail.clone(),
            });
        }

        match outcome {
            ReconcileOutcome::InSync => self.resolve_mismatch(),
            ReconcileOutcome::Skipped => {}
            ReconcileOutcome::ClosedExternally(trade) => {
                self.on_closed_trade(trade);
                self.resolve_mismatch();
            }
            ReconcileOutcome::Mismatch { .. } => {
                self.raise(TradingError::ReconciliationMismatch(
                    text.unwrap_or_else(|| "local position disagrees with exchange".to_string()),
                ));
            }
            ReconcileOutcome::ResolvedFlat => {
                if let Some(text) = text {
                    self.notify(text, NotifyCategory::Trade);
                }
                self.resolve_mismatch();
            }
            ReconcileOutcome::Adopted(position) => {
                self.journal(JournalEvent::Entry { position });
                if let Some(text) = text {
                    self.notify(text, NotifyCategory::Trade);
                }
                self.resolve_mismatch();
                self.sync_stop().await;
            }
        }
    }

    fn resolve_mismatch(&mut self) {
        if self.session.alerts.clear(ErrorKind::ReconciliationMismatch) {
            self.notify(format_recovery(ErrorKind::ReconciliationMismatch), NotifyCategory::Error);
        }
        if self.session.connection.is_connected() && self.session.alerts.clear(ErrorKind::Connectivity) {
            self.notify(format_recovery(ErrorKind::Connectivity), NotifyCategory::Error);
        }
    }

    fn set_account(&mut self, account: AccountState) {
        self.session.account = Some(account);
        set_decimal_gauge("account_balance", account.balance);
        set_decimal_gauge("available_margin", account.available_margin);
    }

    /// Log an error and alert once per category until it recovers
    fn raise(&mut self, err: TradingError) {
        let kind = err.kind();
        metrics::counter!("trading_errors_total", "kind" => kind.as_str()).increment(1);
        tracing::error!(kind = kind.as_str(), error = %err, "Trading error");
        if self.session.alerts.raise(kind) {
            self.notify(format_error(&err), NotifyCategory::Error);
        }
    }

    /// Final reconciliation bounded by the shutdown grace period
    async fn shutdown(mut self) -> SessionSnapshot {
        tracing::info!("Engine shutting down");

        if self.settings.close_on_shutdown && self.session.manager.position().is_some() {
            let price = self.session.last_price;
            self.exit(ExitReason::Shutdown, price).await;
        }

        match tokio::time::timeout(self.settings.shutdown_grace, self.poller.poll_once()).await {
            Ok(report) => self.handle_report(report).await,
            Err(_) => tracing::warn!(grace = ?self.settings.shutdown_grace, "Final reconciliation timed out"),
        }

        let snapshot = self.session.snapshot();
        let state = snapshot.position_state.as_str();
        self.journal(JournalEvent::Reconciliation {
            outcome: "shutdown".to_string(),
            detail: format!("final state {state}"),
        });
        self.notify(
            format!(
                "Bot stopped\nPosition: {state}\n{}",
                format_stats(&snapshot.stats, snapshot.account.map(|a| a.balance))
            ),
            NotifyCategory::Startup,
        );
        self.snapshot_tx.send_replace(snapshot.clone());

        if let Some(journal) = self.journal.take() {
            journal.close().await;
        }
        snapshot
    }
}

fn outcome_name(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::InSync => "in_sync",
        ReconcileOutcome::ClosedExternally(_) => "closed_externally",
        ReconcileOutcome::Mismatch { .. } => "mismatch",
        ReconcileOutcome::ResolvedFlat => "resolved_flat",
        ReconcileOutcome::Adopted(_) => "adopted",
        ReconcileOutcome::Skipped => "skipped",
    }
}
