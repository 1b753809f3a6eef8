//! Trading session state

use crate::candle::{CandleAggregator, CandleWindow, Timeframe};
use crate::error::ErrorKind;
use crate::feed::ConnectionStatus;
use crate::journal::TradeStats;
use crate::notify::AlertLatch;
use crate::position::{Position, PositionManager, PositionState, TradeSpacingState};
use crate::risk::AccountState;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why entries are currently paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Market data connection is down
    Disconnected,
    /// Position state could not be confirmed
    PositionUnknown,
    /// Local and exchange positions disagree
    ReconciliationMismatch,
}

/// Everything the engine owns; mutated only by the engine task
pub struct TradingSession {
    pub window: CandleWindow,
    pub aggregator: CandleAggregator,
    pub manager: PositionManager,
    pub account: Option<AccountState>,
    pub connection: ConnectionStatus,
    /// Whether the feed has connected at least once
    pub connected_once: bool,
    pub last_price: Option<Decimal>,
    /// Impulse index of the last signal acted upon
    pub consumed_signal: Option<u64>,
    pub stats: TradeStats,
    pub alerts: AlertLatch,
}

impl TradingSession {
    pub fn new(window_capacity: usize, timeframe: Timeframe, manager: PositionManager) -> Self {
        Self {
            window: CandleWindow::new(window_capacity),
            aggregator: CandleAggregator::new(timeframe),
            manager,
            account: None,
            connection: ConnectionStatus::Disconnected,
            connected_once: false,
            last_price: None,
            consumed_signal: None,
            stats: TradeStats::default(),
            alerts: AlertLatch::new(),
        }
    }

    /// Reason new entries are blocked, if any
    pub fn entries_paused(&self) -> Option<PauseReason> {
        if !self.connection.is_connected() {
            return Some(PauseReason::Disconnected);
        }
        if self.manager.state() == PositionState::Unknown {
            return Some(PauseReason::PositionUnknown);
        }
        if self.alerts.is_raised(ErrorKind::ReconciliationMismatch) {
            return Some(PauseReason::ReconciliationMismatch);
        }
        None
    }

    /// Whether the signal at `impulse_index` was already acted upon
    pub fn signal_consumed(&self, impulse_index: u64) -> bool {
        self.consumed_signal.is_some_and(|consumed| impulse_index <= consumed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            position_state: self.manager.state(),
            position: self.manager.position().cloned(),
            connection: self.connection,
            last_price: self.last_price,
            account: self.account,
            candle_count: self.window.len(),
            latest_candle_index: self.window.latest_index(),
            latest_close: self.window.latest().map(|c| c.close),
            spacing: self.manager.spacing(),
            stats: self.stats,
            paused: self.entries_paused(),
            updated_at: Utc::now(),
        }
    }
}

/// Consistent read-only view of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub position_state: PositionState,
    pub position: Option<Position>,
    pub connection: ConnectionStatus,
    pub last_price: Option<Decimal>,
    pub account: Option<AccountState>,
    pub candle_count: usize,
    pub latest_candle_index: Option<u64>,
    pub latest_close: Option<Decimal>,
    pub spacing: TradeSpacingState,
    pub stats: TradeStats,
    pub paused: Option<PauseReason>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PaperExchange;
    use crate::position::ManagerConfig;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    fn session() -> TradingSession {
        let manager = PositionManager::new(
            ManagerConfig {
                symbol: "ETHUSD".into(),
                stop_loss_pct: dec!(0.02),
                trailing_stop_pct: dec!(0.015),
                order_timeout: Duration::from_millis(100),
                stop_modify_max_attempts: 3,
                stop_retry_delay: Duration::from_millis(1),
            },
            Arc::new(PaperExchange::new(dec!(1000), dec!(0))),
        );
        TradingSession::new(25, Timeframe::default(), manager)
    }

    #[test]
    fn test_entries_paused_until_connected() {
        let mut session = session();
        assert_eq!(session.entries_paused(), Some(PauseReason::Disconnected));

        session.connection = ConnectionStatus::Connected;
        assert_eq!(session.entries_paused(), None);

        session.alerts.raise(ErrorKind::ReconciliationMismatch);
        assert_eq!(session.entries_paused(), Some(PauseReason::ReconciliationMismatch));

        session.manager.mark_unknown();
        assert_eq!(session.entries_paused(), Some(PauseReason::PositionUnknown));
    }

    #[test]
    fn test_consumed_signal_marker() {
        let mut session = session();
        assert!(!session.signal_consumed(0));
        session.consumed_signal = Some(20);
        assert!(session.signal_consumed(20));
        assert!(session.signal_consumed(19));
        assert!(!session.signal_consumed(21));
    }

    #[test]
    fn test_snapshot_reflects_session() {
        let mut session = session();
        session.last_price = Some(dec!(2000));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.position_state, PositionState::Flat);
        assert_eq!(snapshot.last_price, Some(dec!(2000)));
        assert_eq!(snapshot.candle_count, 0);
        assert!(snapshot.position.is_none());
    }
}
