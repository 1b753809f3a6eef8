//! Trading error taxonomy
//!
//! Module errors are folded into [`TradingError`] at the engine boundary so
//! that each failure maps to one alert category.

use crate::execution::ExchangeError;
use crate::position::PositionError;
use crate::risk::RiskError;
use crate::ws::WsError;
use thiserror::Error;

/// Errors surfaced by the trading loop
#[derive(Debug, Clone, Error)]
pub enum TradingError {
    /// Transient feed or exchange connectivity failure
    #[error("Connectivity: {0}")]
    Connectivity(String),
    /// Entry refused by the exchange; the signal is discarded
    #[error("Order rejected: {0}")]
    OrderRejection(String),
    /// Exchange stop could not be updated; the position stays open
    #[error("Stop update failed after {attempts} attempts: {last_error}")]
    StopModification { attempts: u32, last_error: String },
    /// Local and exchange positions disagree; entries halted
    #[error("Reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),
    /// Sized entry rounds to zero
    #[error("Insufficient margin: {0}")]
    InsufficientMargin(String),
}

/// Alert category of a [`TradingError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connectivity,
    OrderRejection,
    StopModification,
    ReconciliationMismatch,
    InsufficientMargin,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::OrderRejection => "order_rejection",
            ErrorKind::StopModification => "stop_modification",
            ErrorKind::ReconciliationMismatch => "reconciliation_mismatch",
            ErrorKind::InsufficientMargin => "insufficient_margin",
        }
    }
}

impl TradingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TradingError::Connectivity(_) => ErrorKind::Connectivity,
            TradingError::OrderRejection(_) => ErrorKind::OrderRejection,
            TradingError::StopModification { .. } => ErrorKind::StopModification,
            TradingError::ReconciliationMismatch(_) => ErrorKind::ReconciliationMismatch,
            TradingError::InsufficientMargin(_) => ErrorKind::InsufficientMargin,
        }
    }

    /// Whether the failure should pause new entries until it recovers
    pub fn pauses_entries(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connectivity | ErrorKind::ReconciliationMismatch
        )
    }
}

impl From<ExchangeError> for TradingError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Rejected(reason) => TradingError::OrderRejection(reason),
            other => TradingError::Connectivity(other.to_string()),
        }
    }
}

impl From<WsError> for TradingError {
    fn from(err: WsError) -> Self {
        TradingError::Connectivity(err.to_string())
    }
}

impl From<RiskError> for TradingError {
    fn from(err: RiskError) -> Self {
        TradingError::InsufficientMargin(err.to_string())
    }
}

impl From<PositionError> for TradingError {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::OrderRejected(reason) => TradingError::OrderRejection(reason),
            PositionError::EntryNotFilled(id) => {
                TradingError::OrderRejection(format!("entry order {id} did not fill"))
            }
            PositionError::StopModification {
                attempts,
                last_error,
            } => TradingError::StopModification {
                attempts,
                last_error,
            },
            PositionError::ReconciliationMismatch => {
                TradingError::ReconciliationMismatch(err.to_string())
            }
            PositionError::Exchange(e) => e.into(),
            PositionError::NotFlat(_) | PositionError::NotOpen => {
                TradingError::ReconciliationMismatch(err.to_string())
            }
        }
    }
}
