//! Configuration types for ob-trader

use crate::candle::Timeframe;
use crate::signal::TrendBias;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub trading: TradingConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Instrument and account sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Exchange symbol, e.g. ETHUSD
    pub symbol: String,
    /// Delta product id of the symbol
    pub product_id: u64,
    /// Candle interval
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    /// Capital reported at startup
    pub initial_capital: Decimal,
    /// Fraction of balance committed per trade (1.0 = 100%)
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: Decimal,
    /// Initial stop distance as a fraction of entry
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Trailing distance as a fraction of price
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: Decimal,
    /// Contract size in base units (0.01 ETH per contract)
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
    /// Wallet asset used for balance and margin
    #[serde(default = "default_settlement_asset")]
    pub settlement_asset: String,
}

fn default_timeframe() -> Timeframe {
    Timeframe::default()
}
fn default_max_position_size_pct() -> Decimal {
    dec!(1.0)
}
fn default_stop_loss_pct() -> Decimal {
    dec!(0.02)
}
fn default_trailing_stop_pct() -> Decimal {
    dec!(0.015)
}
fn default_lot_size() -> Decimal {
    dec!(0.01)
}
fn default_settlement_asset() -> String {
    "USD".to_string()
}

/// Order block detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum impulse body move (0.015 = 1.5%)
    #[serde(default = "default_sensitivity")]
    pub sensitivity: Decimal,
    /// Minimum volume percentile rank (0-100)
    #[serde(default = "default_min_volume_percentile")]
    pub min_volume_percentile: Decimal,
    /// Candles used for trend and volume rank
    #[serde(default = "default_trend_period")]
    pub trend_period: usize,
    /// Minimum candles between trades
    #[serde(default = "default_min_trades_distance")]
    pub min_trades_distance: u64,
    /// Minimum wall-clock seconds between entries
    #[serde(default)]
    pub min_trade_interval_secs: u64,
    #[serde(default)]
    pub bias: TrendBias,
    /// Newest closed candles considered as impulse candidates
    #[serde(default = "default_impulse_lookback")]
    pub impulse_lookback: usize,
    /// Candles searched before the impulse for the opposing candle
    #[serde(default = "default_block_search_depth")]
    pub block_search_depth: usize,
    /// ATR spike filter, disabled when unset
    #[serde(default)]
    pub max_atr_ratio: Option<Decimal>,
}

fn default_sensitivity() -> Decimal {
    dec!(0.015)
}
fn default_min_volume_percentile() -> Decimal {
    dec!(50)
}
fn default_trend_period() -> usize {
    20
}
fn default_min_trades_distance() -> u64 {
    10
}
fn default_impulse_lookback() -> usize {
    1
}
fn default_block_search_depth() -> usize {
    5
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            min_volume_percentile: default_min_volume_percentile(),
            trend_period: default_trend_period(),
            min_trades_distance: default_min_trades_distance(),
            min_trade_interval_secs: 0,
            bias: TrendBias::default(),
            impulse_lookback: default_impulse_lookback(),
            block_search_depth: default_block_search_depth(),
            max_atr_ratio: None,
        }
    }
}

/// Delta Exchange REST settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default, skip_serializing)]
    pub api_secret: String,
    /// Per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "https://cdn-ind.testnet.deltaex.org".to_string()
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_user_agent() -> String {
    concat!("ob-trader/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            api_secret: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

/// Streaming market data settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Backoff jitter as a fraction of the delay (0.2 = +/-20%)
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
    /// Unlimited when unset
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
    /// Reconnect when no frame arrives for this long
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Fetch missed candles from REST after a reconnect
    #[serde(default = "default_true")]
    pub replay_enabled: bool,
}

fn default_ws_url() -> String {
    "wss://socket-ind.testnet.deltaex.org".to_string()
}
fn default_channel() -> String {
    "all_trades".to_string()
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
fn default_backoff_jitter() -> f64 {
    0.2
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_pong_timeout_secs() -> u64 {
    10
}
fn default_idle_timeout_secs() -> u64 {
    60
}
fn default_channel_buffer() -> usize {
    1024
}
fn default_true() -> bool {
    true
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            channel: default_channel(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_jitter: default_backoff_jitter(),
            max_reconnect_attempts: None,
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            channel_buffer: default_channel_buffer(),
            replay_enabled: true,
        }
    }
}

/// Execution mode: paper trading or live
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Paper,
    Live,
}

/// Order execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Upper bound on a single exchange call
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,
    #[serde(default = "default_stop_modify_max_attempts")]
    pub stop_modify_max_attempts: u32,
    /// Linear backoff step between stop retries
    #[serde(default = "default_stop_retry_delay_ms")]
    pub stop_retry_delay_ms: u64,
    /// Simulated slippage for paper fills
    #[serde(default)]
    pub paper_slippage: Decimal,
}

fn default_order_timeout_ms() -> u64 {
    5_000
}
fn default_stop_modify_max_attempts() -> u32 {
    3
}
fn default_stop_retry_delay_ms() -> u64 {
    250
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            order_timeout_ms: default_order_timeout_ms(),
            stop_modify_max_attempts: default_stop_modify_max_attempts(),
            stop_retry_delay_ms: default_stop_retry_delay_ms(),
            paper_slippage: Decimal::ZERO,
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Balance and position poll period
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Bound on the final reconciliation during shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// How often quiet intervals are sealed
    #[serde(default = "default_seal_interval_secs")]
    pub seal_interval_secs: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Close any open position before exiting
    #[serde(default)]
    pub close_on_shutdown: bool,
}

fn default_reconcile_interval_secs() -> u64 {
    30
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_seal_interval_secs() -> u64 {
    1
}
fn default_event_buffer() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            seal_interval_secs: default_seal_interval_secs(),
            event_buffer: default_event_buffer(),
            close_on_shutdown: false,
        }
    }
}

/// Telegram notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}
fn default_queue_size() -> usize {
    64
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            api_url: default_telegram_api_url(),
            queue_size: default_queue_size(),
        }
    }
}

/// Trade journal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_journal_path")]
    pub path: PathBuf,
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("./data/trades.jsonl")
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_journal_path(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus exporter port, disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, apply env overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse without env overrides or validation
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Replace secrets with values from the environment when present
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = non_empty("DELTA_API_KEY") {
            self.exchange.api_key = v;
        }
        if let Some(v) = non_empty("DELTA_API_SECRET") {
            self.exchange.api_secret = v;
        }
        if let Some(v) = non_empty("TELEGRAM_BOT_TOKEN") {
            self.notify.bot_token = v;
        }
        if let Some(v) = non_empty("TELEGRAM_CHAT_ID") {
            self.notify.chat_id = v;
        }
    }

    /// Check ranges and cross-field requirements
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let t = &self.trading;
        let s = &self.strategy;

        if t.symbol.trim().is_empty() {
            return invalid("trading.symbol must not be empty");
        }
        if t.initial_capital <= Decimal::ZERO {
            return invalid("trading.initial_capital must be positive");
        }
        if t.max_position_size_pct <= Decimal::ZERO || t.max_position_size_pct > Decimal::ONE {
            return invalid("trading.max_position_size_pct must be in (0, 1]");
        }
        if t.stop_loss_pct <= Decimal::ZERO || t.stop_loss_pct >= Decimal::ONE {
            return invalid("trading.stop_loss_pct must be in (0, 1)");
        }
        if t.trailing_stop_pct <= Decimal::ZERO || t.trailing_stop_pct >= Decimal::ONE {
            return invalid("trading.trailing_stop_pct must be in (0, 1)");
        }
        if t.lot_size <= Decimal::ZERO {
            return invalid("trading.lot_size must be positive");
        }
        if s.sensitivity <= Decimal::ZERO {
            return invalid("strategy.sensitivity must be positive");
        }
        if s.min_volume_percentile < Decimal::ZERO || s.min_volume_percentile > dec!(100) {
            return invalid("strategy.min_volume_percentile must be in [0, 100]");
        }
        if s.trend_period < 2 {
            return invalid("strategy.trend_period must be at least 2");
        }
        if s.impulse_lookback == 0 || s.block_search_depth == 0 {
            return invalid("strategy.impulse_lookback and block_search_depth must be positive");
        }
        if matches!(s.max_atr_ratio, Some(r) if r <= Decimal::ZERO) {
            return invalid("strategy.max_atr_ratio must be positive");
        }
        if !(0.0..1.0).contains(&self.feed.backoff_jitter) {
            return invalid("feed.backoff_jitter must be in [0, 1)");
        }
        if self.feed.initial_backoff_ms == 0 || self.feed.max_backoff_ms < self.feed.initial_backoff_ms {
            return invalid("feed backoff bounds are inconsistent");
        }
        if self.execution.stop_modify_max_attempts == 0 {
            return invalid("execution.stop_modify_max_attempts must be positive");
        }
        if self.execution.mode == ExecutionMode::Live
            && (self.exchange.api_key.is_empty() || self.exchange.api_secret.is_empty())
        {
            return invalid("live mode requires exchange.api_key and exchange.api_secret");
        }
        if self.notify.enabled && (self.notify.bot_token.is_empty() || self.notify.chat_id.is_empty())
        {
            return invalid("notify.enabled requires bot_token and chat_id");
        }
        Ok(())
    }
}
