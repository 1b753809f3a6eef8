//! Notification message text

use crate::config::ExecutionMode;
use crate::error::{ErrorKind, TradingError};
use crate::journal::TradeStats;
use crate::position::{ClosedTrade, Position, ReconcileOutcome};
use crate::risk::AccountState;
use rust_decimal::Decimal;

pub fn format_startup(
    mode: ExecutionMode,
    symbol: &str,
    initial_capital: Decimal,
    account: Option<&AccountState>,
) -> String {
    let balance = match account {
        Some(account) => format!("${:.2}", account.balance),
        None => "unavailable".to_string(),
    };
    format!(
        "Bot started ({mode:?})\nSymbol: {symbol}\nInitial capital: ${initial_capital:.2}\nExchange balance: {balance}"
    )
}

pub fn format_entry(position: &Position) -> String {
    format!(
        "New {} position\nEntry: ${}\nSize: {}\nStop loss: ${:.2}",
        position.direction.as_str().to_uppercase(),
        position.entry_price,
        position.size,
        position.stop_price
    )
}

pub fn format_stop_update(position: &Position, previous: Decimal) -> String {
    format!(
        "Trailing stop moved ({})\n${previous:.2} -> ${:.2}",
        position.direction, position.stop_price
    )
}

pub fn format_exit(trade: &ClosedTrade) -> String {
    format!(
        "Position closed ({})\nType: {}\nEntry: ${}\nExit: ${}\nSize: {}\nPnL: ${:.2}",
        trade.exit_reason.as_str(),
        trade.position.direction,
        trade.position.entry_price,
        trade.exit_price,
        trade.position.size,
        trade.pnl
    )
}

pub fn format_stats(stats: &TradeStats, balance: Option<Decimal>) -> String {
    let mut text = format!(
        "Trade statistics\nTotal trades: {}\nWin rate: {:.2}%\nTotal PnL: ${:.2}\nAverage PnL: ${:.2}",
        stats.total_trades,
        stats.win_rate(),
        stats.total_pnl,
        stats.average_pnl()
    );
    if let Some(balance) = balance {
        text.push_str(&format!("\nBalance: ${balance:.2}"));
    }
    text
}

pub fn format_error(err: &TradingError) -> String {
    format!("Error [{}]: {}", err.kind().as_str(), err)
}

pub fn format_recovery(kind: ErrorKind) -> String {
    format!("Recovered: {}", kind.as_str())
}

/// Text for reconciliation outcomes worth telling the operator about
pub fn format_reconciliation(outcome: &ReconcileOutcome) -> Option<String> {
    match outcome {
        ReconcileOutcome::InSync | ReconcileOutcome::Skipped => None,
        ReconcileOutcome::ClosedExternally(trade) => Some(format!(
            "Position closed on the exchange\n{}",
            format_exit(trade)
        )),
        ReconcileOutcome::Mismatch { local, exchange } => Some(format!(
            "Position mismatch, entries paused\nLocal: {}\nExchange: {}",
            local
                .as_ref()
                .map(|p| format!("{} {} @ {}", p.direction, p.size, p.entry_price))
                .unwrap_or_else(|| "flat".to_string()),
            exchange
                .as_ref()
                .map(|s| format!("{} {} @ {}", s.direction, s.size, s.entry_price))
                .unwrap_or_else(|| "flat".to_string()),
        )),
        ReconcileOutcome::ResolvedFlat => Some("Position state resolved: flat".to_string()),
        ReconcileOutcome::Adopted(position) => Some(format!(
            "Adopted exchange position\n{}",
            format_entry(position)
        )),
    }
}
