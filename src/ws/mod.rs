//! WebSocket client library
//!
//! Provides a reusable WebSocket client with automatic reconnection,
//! resubscription, ping/pong and idle watchdogs, and jittered backoff.

mod backoff;
mod client;
mod types;

pub use backoff::Backoff;
pub use client::WsClient;
pub use types::{WsConfig, WsError, WsMessage};
