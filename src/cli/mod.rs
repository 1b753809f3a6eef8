//! CLI interface for ob-trader
//!
//! Provides subcommands for:
//! - `run`: Start the trading engine
//! - `reconcile`: Compare the journal with the exchange position
//! - `status`: Show journal statistics
//! - `products`: List exchange products
//! - `config`: Show the effective configuration

mod products;
mod reconcile;
mod run;
mod status;

pub use products::ProductsArgs;
pub use reconcile::ReconcileArgs;
pub use run::RunArgs;
pub use status::StatusArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ob-trader")]
#[command(about = "Order block trading agent for Delta Exchange perpetuals")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start trading (paper or live per configuration)
    Run(RunArgs),
    /// Read the exchange position and balance once
    Reconcile(ReconcileArgs),
    /// Show trade statistics from the journal
    Status(StatusArgs),
    /// List exchange products
    Products(ProductsArgs),
    /// Show configuration
    Config,
}
