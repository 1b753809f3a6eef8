//! Status command implementation

use crate::config::Config;
use crate::journal::{open_position, read_journal, TradeStats};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Journal to read instead of the configured one
    #[arg(long)]
    pub journal: Option<PathBuf>,
}

impl StatusArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let path = self.journal.clone().unwrap_or(config.journal.path);
        let records = read_journal(&path).await?;
        let stats = TradeStats::from_records(&records);

        println!("ob-trader status");
        println!("  Symbol: {}", config.trading.symbol);
        println!("  Mode: {:?}", config.execution.mode);
        println!("  Journal: {} ({} records)", path.display(), records.len());
        if let Some(last) = records.last() {
            println!("  Last event: {} at {}", last.event.kind(), last.at);
        }
        match open_position(&records) {
            Some(p) => println!(
                "  Position: {} {} @ {} (stop {})",
                p.direction, p.size, p.entry_price, p.stop_price
            ),
            None => println!("  Position: flat"),
        }
        println!("  Trades: {} ({} closed externally)", stats.total_trades, stats.external_closes);
        println!("  Win rate: {:.2}%", stats.win_rate());
        println!("  Total PnL: ${:.2}", stats.total_pnl);
        println!("  Average PnL: ${:.2}", stats.average_pnl());
        Ok(())
    }
}
