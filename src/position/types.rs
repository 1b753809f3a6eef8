//! Position lifecycle types

use crate::execution::{ExchangeError, OrderId, PositionSnapshot};
use crate::signal::Direction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of the single position slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Flat,
    /// Entry order in flight
    PendingEntry,
    Open,
    /// Exit order in flight
    PendingExit,
    /// Local state could not be confirmed against the exchange
    Unknown,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Flat => "flat",
            PositionState::PendingEntry => "pending_entry",
            PositionState::Open => "open",
            PositionState::PendingExit => "pending_exit",
            PositionState::Unknown => "unknown",
        }
    }
}

/// The live position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub direction: Direction,
    pub entry_price: Decimal,
    /// Quantity in base units
    pub size: Decimal,
    /// Protective stop; only ever moves in the position's favor
    pub stop_price: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Absolute index of the candle that triggered the entry
    pub entry_candle_index: Option<u64>,
    pub entry_order_id: Option<OrderId>,
    /// Resting stop order on the exchange
    pub stop_order_id: Option<OrderId>,
}

impl Position {
    pub fn new(
        direction: Direction,
        entry_price: Decimal,
        size: Decimal,
        stop_price: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            entry_price,
            size,
            stop_price,
            opened_at,
            entry_candle_index: None,
            entry_order_id: None,
            stop_order_id: None,
        }
    }

    /// Whether `price` has reached the stop
    pub fn stop_crossed(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_price,
            Direction::Short => price >= self.stop_price,
        }
    }

    /// Whether `candidate` is strictly better protection than the current stop
    pub fn is_favorable(&self, candidate: Decimal) -> bool {
        match self.direction {
            Direction::Long => candidate > self.stop_price,
            Direction::Short => candidate < self.stop_price,
        }
    }

    /// Evaluate a price tick against the stop.
    ///
    /// The trailing candidate is `price * (1 - pct)` for longs and
    /// `price * (1 + pct)` for shorts, adopted only when strictly favorable.
    pub fn on_tick(&mut self, price: Decimal, trailing_pct: Decimal) -> TickAction {
        if self.stop_crossed(price) {
            return TickAction::StopTriggered {
                stop_price: self.stop_price,
            };
        }
        let candidate = match self.direction {
            Direction::Long => price * (Decimal::ONE - trailing_pct),
            Direction::Short => price * (Decimal::ONE + trailing_pct),
        };
        if self.is_favorable(candidate) {
            let previous = self.stop_price;
            self.stop_price = candidate;
            TickAction::StopRaised {
                previous,
                stop_price: candidate,
            }
        } else {
            TickAction::None
        }
    }

    /// Realized PnL if closed at `exit_price`
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        (exit_price - self.entry_price) * self.size * self.direction.sign()
    }

    /// Whether the exchange snapshot describes this position
    pub fn matches(&self, snapshot: &PositionSnapshot) -> bool {
        snapshot.direction == self.direction && snapshot.size == self.size
    }
}

/// Result of evaluating a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    None,
    /// Trailing stop moved in the position's favor
    StopRaised { previous: Decimal, stop_price: Decimal },
    /// Price crossed the stop; the position should be exited
    StopTriggered { stop_price: Decimal },
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Local stop evaluation crossed the stop
    StopLoss,
    /// Exchange reported flat (resting stop filled or manual close)
    ClosedExternally,
    /// Closed because the engine stopped
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::ClosedExternally => "closed_externally",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

/// A completed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position: Position,
    pub exit_price: Decimal,
    pub exit_reason: ExitReason,
    pub closed_at: DateTime<Utc>,
    pub pnl: Decimal,
}

/// Gate on new entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSpacingState {
    /// Absolute candle index of the last entry or exit
    pub last_trade_candle_index: Option<u64>,
    pub last_trade_timestamp: Option<DateTime<Utc>>,
}

impl TradeSpacingState {
    /// Record a trade; the candle index never moves backwards
    pub fn record(&mut self, candle_index: Option<u64>, at: DateTime<Utc>) {
        if let Some(index) = candle_index {
            self.last_trade_candle_index = Some(
                self.last_trade_candle_index
                    .map_or(index, |last| last.max(index)),
            );
        }
        self.last_trade_timestamp = Some(at);
    }

    /// Whether at least `min_secs` have passed since the last trade
    pub fn interval_elapsed(&self, now: DateTime<Utc>, min_secs: u64) -> bool {
        match self.last_trade_timestamp {
            Some(last) => (now - last).num_seconds() >= min_secs as i64,
            None => true,
        }
    }
}

/// Outcome of comparing local state to the exchange
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    InSync,
    /// Exchange is flat while a position was open locally
    ClosedExternally(ClosedTrade),
    /// States disagree; entries are blocked until resolved
    Mismatch {
        local: Option<Position>,
        exchange: Option<PositionSnapshot>,
    },
    /// Unknown state resolved to flat
    ResolvedFlat,
    /// Exchange position adopted as the live position
    Adopted(Position),
    /// An order is in flight; nothing compared
    Skipped,
}

/// Position manager errors
#[derive(Debug, Clone, Error)]
pub enum PositionError {
    /// Entry refused because a position slot is occupied
    #[error("Cannot enter while {}", .0.as_str())]
    NotFlat(PositionState),
    #[error("No open position")]
    NotOpen,
    #[error("Order rejected: {0}")]
    OrderRejected(String),
    /// Entry order neither filled nor produced a position
    #[error("Entry order {0} did not fill")]
    EntryNotFilled(OrderId),
    #[error("Stop update failed after {attempts} attempts: {last_error}")]
    StopModification { attempts: u32, last_error: String },
    #[error("Exchange state disagrees with local position")]
    ReconciliationMismatch,
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}
