//! Market data feed types

use crate::candle::{Candle, Tick};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streaming connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    /// Waiting `delay` before attempt `attempt`
    Reconnecting { attempt: u32, delay: Duration },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Event delivered to the engine, in arrival order
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Live trade
    Tick(Tick),
    /// Connectivity transition
    Status(ConnectionStatus),
    /// Closed candles for intervals missed while disconnected, oldest first.
    /// Always delivered before the live ticks that follow a reconnect.
    Replay(Vec<Candle>),
}
