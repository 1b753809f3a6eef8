//! Risk management module
//!
//! Position sizing and initial stop placement

mod sizing;
mod types;

pub use sizing::{initial_stop, RiskSizer};
pub use types::{AccountState, RiskError, SizedEntry};
