//! Position module
//!
//! Single-slot position lifecycle, trailing stop and exchange reconciliation

mod manager;
mod types;

pub use manager::{ManagerConfig, PositionManager};
pub use types::{
    ClosedTrade, ExitReason, Position, PositionError, PositionState, ReconcileOutcome, TickAction,
    TradeSpacingState,
};
