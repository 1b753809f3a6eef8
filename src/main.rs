use anyhow::Context;
use clap::Parser;
use ob_trader::cli::{Cli, Commands};
use ob_trader::config::Config;
use rust_decimal_macros::dec;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            let mut config = Config::from_toml_str(include_str!("../config.toml.example"))
                .context("Invalid default config")?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
    };

    // Initialize telemetry
    ob_trader::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!(mode = ?config.execution.mode, "Starting trading mode");
            args.execute(config).await?;
        }
        Commands::Reconcile(args) => args.execute(config).await?,
        Commands::Status(args) => args.execute(config).await?,
        Commands::Products(args) => args.execute(config).await?,
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Trading: {} (product {}) {}",
                config.trading.symbol, config.trading.product_id, config.trading.timeframe
            );
            println!("  Execution: {:?}", config.execution.mode);
            println!(
                "  Risk: size={}%, stop={}%, trailing={}%",
                config.trading.max_position_size_pct * dec!(100),
                config.trading.stop_loss_pct * dec!(100),
                config.trading.trailing_stop_pct * dec!(100)
            );
            println!(
                "  Strategy: sensitivity={}%, volume>={}th pct, trend={} candles, bias={:?}",
                config.strategy.sensitivity * dec!(100),
                config.strategy.min_volume_percentile,
                config.strategy.trend_period,
                config.strategy.bias
            );
            println!("  Exchange: {}", config.exchange.base_url);
            println!("  Feed: {} ({})", config.feed.ws_url, config.feed.channel);
            println!("  Notifications: {}", if config.notify.enabled { "telegram" } else { "log" });
            if config.journal.enabled {
                println!("  Journal: {}", config.journal.path.display());
            }
        }
    }

    Ok(())
}
