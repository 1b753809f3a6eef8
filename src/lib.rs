//! ob-trader: order block trading agent for Delta Exchange perpetuals
//!
//! This library provides the core components for:
//! - Real-time trade feed over WebSocket with reconnect and candle replay
//! - Candle aggregation on a fixed timeframe
//! - Order block detection (impulse, volume conviction, trend bias)
//! - Fixed-fraction position sizing with a percentage stop
//! - Position lifecycle with an exchange-side trailing stop
//! - Periodic reconciliation against the exchange
//! - Paper/live execution
//! - Telegram notifications and a JSONL trade journal
//! - Full observability stack

pub mod candle;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod feed;
pub mod journal;
pub mod notify;
pub mod position;
pub mod risk;
pub mod signal;
pub mod telemetry;
pub mod ws;
