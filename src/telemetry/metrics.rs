//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Start the Prometheus scrape endpoint on `port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Record the round trip of an exchange call
pub fn record_latency(path: &str, duration: Duration) {
    metrics::histogram!("exchange_request_latency_ms", "path" => path.to_string())
        .record(duration.as_secs_f64() * 1000.0);
}

/// Set a gauge from a decimal value
pub fn set_decimal_gauge(name: &'static str, value: Decimal) {
    if let Some(v) = value.to_f64() {
        metrics::gauge!(name).set(v);
    }
}
