//! Engine module
//!
//! The trading loop: session state, the periodic reconciliation poller and
//! the single-writer orchestrator tying detection to the position lifecycle

mod orchestrator;
mod poller;
mod session;

pub use orchestrator::{EngineSettings, TradeEngine};
pub use poller::{ReconcileReport, ReconciliationPoller};
pub use session::{PauseReason, SessionSnapshot, TradingSession};
