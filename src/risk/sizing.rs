//! Position sizing
//!
//! Commits a fixed fraction of the balance per trade, capped by available
//! margin and floored to whole contracts.

use rust_decimal::{Decimal, RoundingStrategy};

use super::{AccountState, RiskError, SizedEntry};
use crate::config::TradingConfig;
use crate::signal::{Direction, OrderBlock};

/// Fixed-fraction sizer with a percentage stop
#[derive(Debug, Clone)]
pub struct RiskSizer {
    /// Fraction of balance per trade (e.g., 0.10 = 10%)
    pub max_position_size_pct: Decimal,
    /// Stop distance from entry (e.g., 0.02 = 2%)
    pub stop_loss_pct: Decimal,
    /// Quantity step
    pub lot_size: Decimal,
}

impl RiskSizer {
    pub fn new(max_position_size_pct: Decimal, stop_loss_pct: Decimal, lot_size: Decimal) -> Self {
        Self {
            max_position_size_pct,
            stop_loss_pct,
            lot_size,
        }
    }

    /// Create from TradingConfig
    pub fn from_config(config: &TradingConfig) -> Self {
        Self::new(
            config.max_position_size_pct,
            config.stop_loss_pct,
            config.lot_size,
        )
    }

    /// Size an entry for `signal` against the current account.
    pub fn size(&self, signal: &OrderBlock, account: &AccountState) -> Result<SizedEntry, RiskError> {
        self.size_at(signal.direction, signal.reference_price, account)
    }

    /// Size an entry in `direction` at `entry_price`.
    pub fn size_at(
        &self,
        direction: Direction,
        entry_price: Decimal,
        account: &AccountState,
    ) -> Result<SizedEntry, RiskError> {
        let notional = (account.balance * self.max_position_size_pct).min(account.available_margin);
        let insufficient = RiskError::InsufficientMargin {
            available: account.available_margin,
            entry_price,
        };
        if entry_price <= Decimal::ZERO || notional <= Decimal::ZERO {
            return Err(insufficient);
        }

        let size = self.floor_to_lot(notional / entry_price);
        if size <= Decimal::ZERO {
            return Err(insufficient);
        }

        Ok(SizedEntry {
            size,
            entry_price,
            initial_stop: initial_stop(direction, entry_price, self.stop_loss_pct),
        })
    }

    /// Round a quantity down to a whole number of lots
    pub fn floor_to_lot(&self, quantity: Decimal) -> Decimal {
        if self.lot_size <= Decimal::ZERO {
            return quantity;
        }
        let lots = (quantity / self.lot_size).round_dp_with_strategy(0, RoundingStrategy::ToZero);
        (lots * self.lot_size).normalize()
    }
}

/// Stop price `stop_loss_pct` away from `entry_price` against the position
pub fn initial_stop(direction: Direction, entry_price: Decimal, stop_loss_pct: Decimal) -> Decimal {
    match direction {
        Direction::Long => entry_price * (Decimal::ONE - stop_loss_pct),
        Direction::Short => entry_price * (Decimal::ONE + stop_loss_pct),
    }
}
