//! Risk management types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Risk management errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    /// Sized position rounds down to zero lots
    #[error("Insufficient margin: {available} available for entry at {entry_price}")]
    InsufficientMargin {
        available: Decimal,
        entry_price: Decimal,
    },
}

/// Account balance snapshot from the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountState {
    /// Wallet balance in the settlement asset
    pub balance: Decimal,
    /// Balance not locked as margin
    pub available_margin: Decimal,
}

impl AccountState {
    pub fn new(balance: Decimal, available_margin: Decimal) -> Self {
        Self {
            balance,
            available_margin,
        }
    }
}

/// Output of the sizer for one signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedEntry {
    /// Quantity in base units, a whole multiple of the lot size
    pub size: Decimal,
    pub entry_price: Decimal,
    pub initial_stop: Decimal,
}
