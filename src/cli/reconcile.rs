//! Reconcile command implementation
//!
//! One-shot comparison of the journal's open position with the exchange.

use crate::config::Config;
use crate::engine::ReconciliationPoller;
use crate::execution::{DeltaClient, PositionSnapshot};
use crate::journal::{open_position, read_journal};
use crate::position::Position;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// How the journal and the exchange relate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agreement {
    InSync,
    /// Journal shows an open position, exchange is flat
    ClosedOnExchange,
    /// Exchange holds a position the journal does not know about
    Untracked,
    /// Both hold positions that differ
    Different,
}

impl Agreement {
    pub fn between(journal: Option<&Position>, exchange: Option<&PositionSnapshot>) -> Self {
        match (journal, exchange) {
            (None, None) => Agreement::InSync,
            (Some(local), Some(snap)) if local.matches(snap) => Agreement::InSync,
            (Some(_), None) => Agreement::ClosedOnExchange,
            (None, Some(_)) => Agreement::Untracked,
            (Some(_), Some(_)) => Agreement::Different,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Agreement::InSync => "in_sync",
            Agreement::ClosedOnExchange => "closed_on_exchange",
            Agreement::Untracked => "untracked",
            Agreement::Different => "different",
        }
    }
}

impl ReconcileArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        if config.exchange.api_key.is_empty() || config.exchange.api_secret.is_empty() {
            anyhow::bail!("reconcile needs exchange credentials (DELTA_API_KEY / DELTA_API_SECRET)");
        }
        let client = Arc::new(DeltaClient::new(&config.exchange, &config.trading)?);
        let poller = ReconciliationPoller::new(
            client,
            config.trading.symbol.clone(),
            Duration::from_secs(config.engine.reconcile_interval_secs.max(1)),
            Duration::from_millis(config.execution.order_timeout_ms),
        );

        let report = poller.poll_once().await;
        let exchange = report.position?;
        let account = report.account?;
        let records = read_journal(&config.journal.path).await?;
        let journal = open_position(&records);
        let agreement = Agreement::between(journal.as_ref(), exchange.as_ref());

        if self.json {
            let value = serde_json::json!({
                "symbol": config.trading.symbol,
                "agreement": agreement.as_str(),
                "journal_position": journal,
                "exchange_position": exchange,
                "account": account,
                "at": report.at,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        println!("Reconciliation for {}", config.trading.symbol);
        match &exchange {
            Some(snap) => println!("  Exchange: {} {} @ {}", snap.direction, snap.size, snap.entry_price),
            None => println!("  Exchange: flat"),
        }
        match &journal {
            Some(p) => println!(
                "  Journal:  {} {} @ {} (stop {})",
                p.direction, p.size, p.entry_price, p.stop_price
            ),
            None => println!("  Journal:  flat"),
        }
        println!("  Balance:  {:.2} (available {:.2})", account.balance, account.available_margin);
        println!("  Result:   {}", agreement.as_str());
        Ok(())
    }
}
