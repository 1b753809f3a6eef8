//! Journal record types

use crate::position::{ClosedTrade, ExitReason, Position};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One line of the trade journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

/// Journaled event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    /// Position opened (or adopted from the exchange)
    Entry { position: Position },
    /// Trailing stop moved
    StopUpdate {
        position_id: Uuid,
        previous: Decimal,
        stop_price: Decimal,
    },
    /// Position closed
    Exit { trade: ClosedTrade },
    /// Result of a reconciliation that changed local state
    Reconciliation { outcome: String, detail: String },
}

impl JournalEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            JournalEvent::Entry { .. } => "entry",
            JournalEvent::StopUpdate { .. } => "stop_update",
            JournalEvent::Exit { .. } => "exit",
            JournalEvent::Reconciliation { .. } => "reconciliation",
        }
    }

    /// Closed trade carried by an exit record
    pub fn closed_trade(&self) -> Option<&ClosedTrade> {
        match self {
            JournalEvent::Exit { trade } => Some(trade),
            _ => None,
        }
    }
}

/// Running trade statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub total_pnl: Decimal,
    /// Closes that came from the exchange rather than a local exit
    pub external_closes: u64,
}

impl TradeStats {
    /// Rebuild statistics from journaled records
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a JournalRecord>) -> Self {
        let mut stats = Self::default();
        for trade in records.into_iter().filter_map(|r| r.event.closed_trade()) {
            stats.record(trade);
        }
        stats
    }

    pub fn record(&mut self, trade: &ClosedTrade) {
        self.total_trades += 1;
        if trade.pnl > Decimal::ZERO {
            self.winning_trades += 1;
        }
        if trade.exit_reason == ExitReason::ClosedExternally {
            self.external_closes += 1;
        }
        self.total_pnl += trade.pnl;
    }

    /// Winning share in percent
    pub fn win_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.winning_trades) * Decimal::ONE_HUNDRED / Decimal::from(self.total_trades)
    }

    pub fn average_pnl(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::ZERO;
        }
        self.total_pnl / Decimal::from(self.total_trades)
    }
}

/// Position left open by the journaled history, if any.
///
/// Replays entries, stop updates and exits in order. A `resolved_flat`
/// reconciliation clears the position as well.
pub fn open_position<'a>(records: impl IntoIterator<Item = &'a JournalRecord>) -> Option<Position> {
    let mut open: Option<Position> = None;
    for record in records {
        match &record.event {
            JournalEvent::Entry { position } => open = Some(position.clone()),
            JournalEvent::StopUpdate {
                position_id,
                stop_price,
                ..
            } => {
                if let Some(position) = open.as_mut().filter(|p| p.id == *position_id) {
                    position.stop_price = *stop_price;
                }
            }
            JournalEvent::Exit { trade } => {
                if open.as_ref().is_some_and(|p| p.id == trade.position.id) {
                    open = None;
                }
            }
            JournalEvent::Reconciliation { outcome, .. } if outcome == "resolved_flat" => open = None,
            JournalEvent::Reconciliation { .. } => {}
        }
    }
    open
}
