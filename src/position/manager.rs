//! Position state machine
//!
//! ```text
//! Flat --submit_entry--> PendingEntry --fill--> Open --exit--> PendingExit --fill--> Flat
//!                              |                                    |
//!                              +--unconfirmable--> Unknown <--------+
//! ```
//!
//! Every exchange call is bounded by the order timeout. An entry whose
//! outcome is not known is confirmed by reading the exchange position, and
//! `Unknown` is only left through reconciliation.

use super::{
    ClosedTrade, ExitReason, Position, PositionError, PositionState, ReconcileOutcome, TickAction,
    TradeSpacingState,
};
use crate::config::Config;
use crate::execution::{
    with_timeout, Exchange, ExchangeError, OrderRequest, OrderStatus, PositionSnapshot,
};
use crate::risk::{initial_stop, SizedEntry};
use crate::signal::Direction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Position manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub symbol: String,
    pub stop_loss_pct: Decimal,
    pub trailing_stop_pct: Decimal,
    /// Bound on every exchange call
    pub order_timeout: Duration,
    pub stop_modify_max_attempts: u32,
    /// Linear backoff step between stop attempts
    pub stop_retry_delay: Duration,
}

impl From<&Config> for ManagerConfig {
    fn from(config: &Config) -> Self {
        Self {
            symbol: config.trading.symbol.clone(),
            stop_loss_pct: config.trading.stop_loss_pct,
            trailing_stop_pct: config.trading.trailing_stop_pct,
            order_timeout: Duration::from_millis(config.execution.order_timeout_ms),
            stop_modify_max_attempts: config.execution.stop_modify_max_attempts,
            stop_retry_delay: Duration::from_millis(config.execution.stop_retry_delay_ms),
        }
    }
}

/// Owner of the single position slot
pub struct PositionManager {
    config: ManagerConfig,
    exchange: Arc<dyn Exchange>,
    state: PositionState,
    position: Option<Position>,
    /// Last local position before entering `Unknown`
    last_known: Option<Position>,
    /// Whether the exchange stop matches `position.stop_price`
    stop_synced: bool,
    /// Stop-triggered exits wait for [`release_exit_hold`](Self::release_exit_hold)
    /// after an exit was refused
    exit_held: bool,
    /// Wall-clock time of the last state change
    last_transition: Option<DateTime<Utc>>,
    spacing: TradeSpacingState,
}

impl PositionManager {
    pub fn new(config: ManagerConfig, exchange: Arc<dyn Exchange>) -> Self {
        Self {
            config,
            exchange,
            state: PositionState::Flat,
            position: None,
            last_known: None,
            stop_synced: true,
            exit_held: false,
            last_transition: None,
            spacing: TradeSpacingState::default(),
        }
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn spacing(&self) -> TradeSpacingState {
        self.spacing
    }

    /// Whether a new entry may be attempted
    pub fn is_flat(&self) -> bool {
        self.state == PositionState::Flat
    }

    /// Whether the exchange stop lags the in-memory stop
    pub fn stop_pending(&self) -> bool {
        self.state == PositionState::Open && !self.stop_synced
    }

    /// Whether an exchange read started at `read_at` predates the last
    /// local state change
    pub fn is_stale(&self, read_at: DateTime<Utc>) -> bool {
        self.last_transition.is_some_and(|changed| read_at <= changed)
    }

    /// Allow the next stop-triggered exit after a refused one.
    ///
    /// Returns whether a hold was in place.
    pub fn release_exit_hold(&mut self) -> bool {
        std::mem::take(&mut self.exit_held)
    }

    fn set_state(&mut self, state: PositionState) {
        if self.state != state {
            tracing::debug!(from = self.state.as_str(), to = state.as_str(), "Position state change");
            self.state = state;
            self.last_transition = Some(Utc::now());
        }
        if state != PositionState::Open {
            self.exit_held = false;
        }
        metrics::gauge!("position_open").set(if state == PositionState::Open { 1.0 } else { 0.0 });
    }

    fn open(&mut self, position: Position, at: DateTime<Utc>) -> Position {
        self.spacing.record(position.entry_candle_index, at);
        self.stop_synced = false;
        self.last_known = None;
        self.position = Some(position.clone());
        self.set_state(PositionState::Open);
        position
    }

    fn close(
        &mut self,
        exit_price: Decimal,
        reason: ExitReason,
        candle_index: Option<u64>,
        at: DateTime<Utc>,
    ) -> Option<ClosedTrade> {
        let position = self.position.take().or_else(|| self.last_known.take())?;
        self.last_known = None;
        self.stop_synced = true;
        self.spacing.record(candle_index, at);
        self.set_state(PositionState::Flat);

        let pnl = position.pnl_at(exit_price);
        metrics::counter!("exits_total", "reason" => reason.as_str()).increment(1);
        tracing::info!(
            direction = %position.direction,
            entry = %position.entry_price,
            exit = %exit_price,
            %pnl,
            reason = reason.as_str(),
            "Position closed"
        );
        Some(ClosedTrade {
            position,
            exit_price,
            exit_reason: reason,
            closed_at: at,
            pnl,
        })
    }

    /// Block entries until the exchange position can be read
    pub fn mark_unknown(&mut self) {
        if self.state != PositionState::Unknown {
            self.enter_unknown();
        }
    }

    fn enter_unknown(&mut self) {
        if let Some(position) = self.position.take() {
            self.last_known = Some(position);
        }
        self.stop_synced = true;
        self.set_state(PositionState::Unknown);
        tracing::warn!("Position state unknown, entries blocked until reconciled");
    }

    /// Position built from an exchange snapshot, keeping the stop monotonic
    /// against the last known position in the same direction
    fn from_snapshot(&self, snapshot: &PositionSnapshot, at: DateTime<Utc>) -> Position {
        let mut stop = initial_stop(snapshot.direction, snapshot.entry_price, self.config.stop_loss_pct);
        let mut position = Position::new(snapshot.direction, snapshot.entry_price, snapshot.size, stop, at);

        let previous = self.position.as_ref().or(self.last_known.as_ref());
        if let Some(prev) = previous.filter(|p| p.direction == snapshot.direction) {
            if !prev.is_favorable(stop) {
                stop = prev.stop_price;
            }
            position.stop_price = stop;
            position.id = prev.id;
            position.opened_at = prev.opened_at;
            position.entry_candle_index = prev.entry_candle_index;
            position.entry_order_id = prev.entry_order_id.clone();
            position.stop_order_id = prev.stop_order_id.clone();
        }
        position
    }

    /// Read the exchange position, bounded by the order timeout
    async fn read_position(&self) -> Result<Option<PositionSnapshot>, ExchangeError> {
        with_timeout(
            self.config.order_timeout,
            self.exchange.get_position(&self.config.symbol),
        )
        .await
    }

    /// Submit a market entry for `entry`.
    ///
    /// Only allowed from `Flat`. On a confirmed fill the stop is recomputed
    /// from the actual fill price. Call [`sync_stop`](Self::sync_stop) next to
    /// place the exchange stop.
    pub async fn submit_entry(
        &mut self,
        direction: Direction,
        entry: &SizedEntry,
        candle_index: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Position, PositionError> {
        if self.state != PositionState::Flat {
            return Err(PositionError::NotFlat(self.state));
        }
        self.set_state(PositionState::PendingEntry);

        let order = OrderRequest::market_entry(&self.config.symbol, direction, entry.size, entry.entry_price);
        tracing::info!(
            %direction,
            size = %entry.size,
            price = %entry.entry_price,
            stop = %entry.initial_stop,
            "Submitting entry"
        );
        let result = with_timeout(self.config.order_timeout, self.exchange.place_order(order)).await;

        let order_id = match result {
            Ok(order) if order.is_filled() => {
                let fill_price = order.fill_price.unwrap_or(entry.entry_price);
                let stop = initial_stop(direction, fill_price, self.config.stop_loss_pct);
                let mut position = Position::new(direction, fill_price, order.filled_size, stop, now);
                position.entry_candle_index = candle_index;
                position.entry_order_id = Some(order.id);
                metrics::counter!("entries_total").increment(1);
                tracing::info!(%direction, price = %fill_price, size = %position.size, %stop, "Entry filled");
                return Ok(self.open(position, now));
            }
            Ok(order) if matches!(order.status, OrderStatus::Rejected) => {
                self.set_state(PositionState::Flat);
                let reason = order.reason.unwrap_or_else(|| "rejected".to_string());
                tracing::warn!(%reason, "Entry rejected");
                return Err(PositionError::OrderRejected(reason));
            }
            Ok(order) => {
                tracing::warn!(order_id = %order.id, status = ?order.status, "Entry not confirmed, reading position");
                order.id
            }
            Err(ExchangeError::Rejected(reason)) => {
                self.set_state(PositionState::Flat);
                tracing::warn!(%reason, "Entry rejected");
                return Err(PositionError::OrderRejected(reason));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Entry outcome unknown, reading position");
                String::new()
            }
        };

        match self.read_position().await {
            Ok(Some(snapshot)) if snapshot.direction == direction => {
                let mut position = self.from_snapshot(&snapshot, now);
                position.entry_candle_index = candle_index;
                position.entry_order_id = (!order_id.is_empty()).then_some(order_id);
                metrics::counter!("entries_total").increment(1);
                tracing::info!(price = %position.entry_price, size = %position.size, "Entry confirmed from exchange position");
                Ok(self.open(position, now))
            }
            Ok(Some(snapshot)) => {
                tracing::error!(exchange_direction = %snapshot.direction, "Exchange holds an opposite position");
                self.enter_unknown();
                Err(PositionError::ReconciliationMismatch)
            }
            Ok(None) => {
                self.set_state(PositionState::Flat);
                Err(PositionError::EntryNotFilled(order_id))
            }
            Err(e) => {
                tracing::error!(error = %e, "Entry unconfirmable");
                self.enter_unknown();
                Err(PositionError::Exchange(e))
            }
        }
    }

    /// Bring the exchange stop in line with the in-memory stop.
    ///
    /// Places the stop order when none exists, otherwise modifies it. Retried
    /// with a linear backoff; on exhaustion the position stays open and the
    /// in-memory stop is kept.
    pub async fn sync_stop(&mut self) -> Result<Decimal, PositionError> {
        if self.state != PositionState::Open {
            return Err(PositionError::NotOpen);
        }
        let Some(position) = self.position.clone() else {
            return Err(PositionError::NotOpen);
        };
        if self.stop_synced {
            return Ok(position.stop_price);
        }

        let max_attempts = self.config.stop_modify_max_attempts.max(1);
        let mut stop_order_id = position.stop_order_id.clone();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome = match &stop_order_id {
                Some(id) => with_timeout(
                    self.config.order_timeout,
                    self.exchange.modify_stop(id, position.stop_price),
                )
                .await
                .map(|_| id.clone()),
                None => {
                    let order = OrderRequest::stop_loss(
                        &self.config.symbol,
                        position.direction,
                        position.size,
                        position.stop_price,
                    );
                    match with_timeout(self.config.order_timeout, self.exchange.place_order(order)).await {
                        Ok(result) if result.status == OrderStatus::Rejected => Err(ExchangeError::Rejected(
                            result.reason.unwrap_or_else(|| "stop rejected".to_string()),
                        )),
                        Ok(result) => Ok(result.id),
                        Err(e) => Err(e),
                    }
                }
            };

            match outcome {
                Ok(id) => {
                    if let Some(current) = self.position.as_mut() {
                        current.stop_order_id = Some(id);
                    }
                    self.stop_synced = true;
                    metrics::counter!("stop_updates_total").increment(1);
                    tracing::info!(stop = %position.stop_price, attempt, "Exchange stop synced");
                    return Ok(position.stop_price);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, max_attempts, "Stop update failed");
                    if matches!(e, ExchangeError::OrderNotFound(_)) {
                        // Stop is gone (filled or cancelled); place a fresh one
                        stop_order_id = None;
                    }
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.stop_retry_delay * attempt).await;
                    }
                }
            }
        }

        if stop_order_id.is_none() {
            if let Some(current) = self.position.as_mut() {
                current.stop_order_id = None;
            }
        }
        metrics::counter!("stop_update_failures_total").increment(1);
        Err(PositionError::StopModification {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Evaluate a live price against the open position
    pub fn on_price_tick(&mut self, price: Decimal) -> TickAction {
        if self.state != PositionState::Open {
            return TickAction::None;
        }
        let Some(position) = self.position.as_mut() else {
            return TickAction::None;
        };
        let action = position.on_tick(price, self.config.trailing_stop_pct);
        match action {
            TickAction::StopRaised { previous, stop_price } => {
                self.stop_synced = false;
                tracing::debug!(%previous, %stop_price, %price, "Trailing stop moved");
            }
            TickAction::StopTriggered { .. } if self.exit_held => {
                tracing::debug!(%price, "Stop crossed, exit retry held");
                return TickAction::None;
            }
            _ => {}
        }
        action
    }

    /// Close the open position with a reduce-only market order.
    ///
    /// The resting stop is cancelled first (best effort). A rejected exit is
    /// confirmed against the exchange: flat means it was closed elsewhere,
    /// otherwise the position stays open. An exit whose outcome is unknown
    /// moves to `Unknown`.
    pub async fn exit(
        &mut self,
        reason: ExitReason,
        price_hint: Option<Decimal>,
        candle_index: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<ClosedTrade, PositionError> {
        if self.state != PositionState::Open {
            return Err(PositionError::NotOpen);
        }
        let Some(position) = self.position.clone() else {
            return Err(PositionError::NotOpen);
        };
        self.set_state(PositionState::PendingExit);

        if let Some(stop_id) = &position.stop_order_id {
            if let Err(e) = with_timeout(self.config.order_timeout, self.exchange.cancel_order(stop_id)).await {
                tracing::warn!(error = %e, %stop_id, "Failed to cancel stop before exit");
            }
        }

        let fallback_price = price_hint.unwrap_or(position.stop_price);
        let order = OrderRequest::market_exit(&self.config.symbol, position.direction, position.size, price_hint);
        tracing::info!(reason = reason.as_str(), size = %position.size, "Submitting exit");

        let rejection = match with_timeout(self.config.order_timeout, self.exchange.place_order(order)).await {
            Ok(order) if order.is_filled() => {
                let exit_price = order.fill_price.unwrap_or(fallback_price);
                return self
                    .close(exit_price, reason, candle_index, now)
                    .ok_or(PositionError::NotOpen);
            }
            Ok(order) => order
                .reason
                .unwrap_or_else(|| format!("exit order {} not filled", order.id)),
            Err(ExchangeError::Rejected(reason)) => reason,
            Err(e) => {
                tracing::error!(error = %e, "Exit outcome unknown");
                self.enter_unknown();
                return Err(PositionError::Exchange(e));
            }
        };

        tracing::warn!(%rejection, "Exit not filled, reading position");
        match self.read_position().await {
            Ok(None) => self
                .close(fallback_price, ExitReason::ClosedExternally, candle_index, now)
                .ok_or(PositionError::NotOpen),
            Ok(Some(_)) => {
                // Still open; the cancelled stop must be placed again
                if let Some(current) = self.position.as_mut() {
                    current.stop_order_id = None;
                }
                self.stop_synced = false;
                self.set_state(PositionState::Open);
                self.exit_held = true;
                Err(PositionError::OrderRejected(rejection))
            }
            Err(e) => {
                tracing::error!(error = %e, "Exit unconfirmable");
                self.enter_unknown();
                Err(PositionError::Exchange(e))
            }
        }
    }

    /// Compare local state with the exchange position and resolve.
    ///
    /// `read_at` is when the exchange read started; a read older than the
    /// last local state change is skipped. A local position the exchange no
    /// longer holds is closed at its stop price. Any other disagreement moves
    /// to `Unknown`, and the next call adopts the exchange view.
    pub fn apply_reconciliation(
        &mut self,
        snapshot: Option<PositionSnapshot>,
        candle_index: Option<u64>,
        read_at: DateTime<Utc>,
    ) -> ReconcileOutcome {
        if self.is_stale(read_at) {
            tracing::debug!(%read_at, state = self.state.as_str(), "Exchange read predates last state change, skipped");
            return ReconcileOutcome::Skipped;
        }
        let now = read_at;
        match (self.state, snapshot) {
            (PositionState::PendingEntry | PositionState::PendingExit, _) => ReconcileOutcome::Skipped,
            (PositionState::Flat, None) => ReconcileOutcome::InSync,
            (PositionState::Open, Some(snap)) if self.position.as_ref().is_some_and(|p| p.matches(&snap)) => {
                ReconcileOutcome::InSync
            }
            (PositionState::Open, None) => {
                let exit_price = self
                    .position
                    .as_ref()
                    .map(|p| p.stop_price)
                    .unwrap_or(Decimal::ZERO);
                tracing::warn!(%exit_price, "Exchange is flat, position closed externally");
                match self.close(exit_price, ExitReason::ClosedExternally, candle_index, now) {
                    Some(trade) => ReconcileOutcome::ClosedExternally(trade),
                    None => ReconcileOutcome::InSync,
                }
            }
            (PositionState::Flat | PositionState::Open, exchange) => {
                let local = self.position.clone();
                tracing::error!(?local, ?exchange, "Reconciliation mismatch");
                self.enter_unknown();
                ReconcileOutcome::Mismatch { local, exchange }
            }
            (PositionState::Unknown, None) if self.last_known.is_some() => {
                let exit_price = self
                    .last_known
                    .as_ref()
                    .map(|p| p.stop_price)
                    .unwrap_or(Decimal::ZERO);
                tracing::warn!(%exit_price, "Unknown state resolved: exchange is flat, last position closed externally");
                match self.close(exit_price, ExitReason::ClosedExternally, candle_index, now) {
                    Some(trade) => ReconcileOutcome::ClosedExternally(trade),
                    None => ReconcileOutcome::ResolvedFlat,
                }
            }
            (PositionState::Unknown, None) => {
                self.last_known = None;
                self.position = None;
                self.stop_synced = true;
                self.set_state(PositionState::Flat);
                tracing::info!("Unknown state resolved: exchange is flat");
                ReconcileOutcome::ResolvedFlat
            }
            (PositionState::Unknown, Some(snap)) => {
                let position = self.from_snapshot(&snap, now);
                tracing::info!(direction = %position.direction, size = %position.size, stop = %position.stop_price, "Adopted exchange position");
                ReconcileOutcome::Adopted(self.adopt(position))
            }
        }
    }

    /// Adopt an exchange position found at startup.
    ///
    /// From `Flat` an existing exchange position becomes the live position
    /// directly instead of being treated as a mismatch. `journaled` is the
    /// position the trade journal last recorded as open; when it matches the
    /// exchange direction its id, stop order and tighter stop carry over.
    pub fn startup_sync(
        &mut self,
        snapshot: Option<PositionSnapshot>,
        journaled: Option<Position>,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        match (self.state, snapshot) {
            (PositionState::Flat, Some(snap)) => {
                self.last_known = journaled;
                let position = self.from_snapshot(&snap, now);
                tracing::info!(direction = %position.direction, size = %position.size, stop = %position.stop_price, "Adopting existing exchange position at startup");
                ReconcileOutcome::Adopted(self.adopt(position))
            }
            (PositionState::Flat, None) => {
                if let Some(position) = journaled {
                    tracing::warn!(id = %position.id, direction = %position.direction, "Journaled position is no longer open on the exchange");
                }
                ReconcileOutcome::InSync
            }
            (_, snapshot) => self.apply_reconciliation(snapshot, None, now),
        }
    }

    fn adopt(&mut self, position: Position) -> Position {
        self.last_known = None;
        self.stop_synced = false;
        self.position = Some(position.clone());
        self.set_state(PositionState::Open);
        position
    }
}
