//! Configuration loading tests

use ob_trader::config::{Config, ConfigError, ExecutionMode, LogFormat};
use ob_trader::signal::TrendBias;
use rust_decimal_macros::dec;
use std::io::Write;
use std::path::PathBuf;

fn example_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.toml.example")
}

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_example_config_loads() {
    let config = Config::load(example_path()).unwrap();
    assert_eq!(config.trading.symbol, "ETHUSD");
    assert_eq!(config.trading.product_id, 1699);
    assert_eq!(config.trading.timeframe.as_str(), "15m");
    assert_eq!(config.trading.stop_loss_pct, dec!(0.02));
    assert_eq!(config.trading.trailing_stop_pct, dec!(0.015));
    assert_eq!(config.strategy.sensitivity, dec!(0.015));
    assert_eq!(config.strategy.bias, TrendBias::WithTrend);
    assert_eq!(config.execution.mode, ExecutionMode::Paper);
    assert_eq!(config.telemetry.log_format, LogFormat::Pretty);
    assert!(!config.notify.enabled);
}

#[test]
fn test_unsupported_timeframe_rejected() {
    let file = write_config(
        r#"
        [trading]
        symbol = "ETHUSD"
        product_id = 1699
        timeframe = "7m"
        initial_capital = "100"
        "#,
    );
    assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));
}

#[test]
fn test_out_of_range_values_rejected() {
    let file = write_config(
        r#"
        [trading]
        symbol = "ETHUSD"
        product_id = 1699
        initial_capital = "100"
        max_position_size_pct = "1.5"
        "#,
    );
    let err = Config::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("max_position_size_pct"));
}

#[test]
fn test_notifications_need_credentials() {
    let mut config = Config::from_toml_str(
        r#"
        [trading]
        symbol = "ETHUSD"
        product_id = 1699
        initial_capital = "100"

        [notify]
        enabled = true
        "#,
    )
    .unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    config.apply_env_overrides(|key| match key {
        "TELEGRAM_BOT_TOKEN" => Some("token".to_string()),
        "TELEGRAM_CHAT_ID" => Some("42".to_string()),
        _ => None,
    });
    config.validate().unwrap();
    assert_eq!(config.notify.chat_id, "42");
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
