//! Products command implementation

use crate::config::Config;
use crate::execution::DeltaClient;
use clap::Args;

#[derive(Args, Debug)]
pub struct ProductsArgs {
    /// Only show products whose symbol or description contains this text
    #[arg(short, long)]
    pub filter: Option<String>,
}

impl ProductsArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let client = DeltaClient::new(&config.exchange, &config.trading)?;
        let products = client.list_products(self.filter.as_deref()).await?;

        if products.is_empty() {
            println!("No products found");
            return Ok(());
        }
        println!("{:>8}  {:<16}  {:<20}  {}", "ID", "SYMBOL", "TYPE", "DESCRIPTION");
        for product in &products {
            println!(
                "{:>8}  {:<16}  {:<20}  {}",
                product.id, product.symbol, product.contract_type, product.description
            );
        }
        tracing::debug!(count = products.len(), "Listed products");
        Ok(())
    }
}
