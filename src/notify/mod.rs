//! Notification module
//!
//! Fire-and-forget operator notifications. Sinks never block the caller and
//! only log their own failures.

mod format;
mod telegram;

pub use format::{
    format_entry, format_error, format_exit, format_reconciliation, format_recovery, format_startup,
    format_stats, format_stop_update,
};
pub use telegram::TelegramSink;

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Notification channel category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyCategory {
    Startup,
    Connection,
    Trade,
    StopUpdate,
    Error,
}

impl NotifyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyCategory::Startup => "startup",
            NotifyCategory::Connection => "connection",
            NotifyCategory::Trade => "trade",
            NotifyCategory::StopUpdate => "stop_update",
            NotifyCategory::Error => "error",
        }
    }
}

/// Destination for operator notifications
pub trait NotificationSink: Send + Sync {
    /// Queue `message`; must return immediately
    fn notify(&self, message: String, category: NotifyCategory);
}

/// Sink that only writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, message: String, category: NotifyCategory) {
        tracing::info!(category = category.as_str(), %message, "Notification");
    }
}

/// Sink that keeps notifications in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<(NotifyCategory, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(NotifyCategory, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, category: NotifyCategory) -> usize {
        self.messages().iter().filter(|(c, _)| *c == category).count()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, message: String, category: NotifyCategory) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((category, message));
        }
    }
}

/// One alert per error category until that category recovers
#[derive(Debug, Default, Clone)]
pub struct AlertLatch {
    raised: HashSet<ErrorKind>,
}

impl AlertLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `kind`; true when it was not already raised
    pub fn raise(&mut self, kind: ErrorKind) -> bool {
        self.raised.insert(kind)
    }

    /// Release `kind`; true when it was raised
    pub fn clear(&mut self, kind: ErrorKind) -> bool {
        self.raised.remove(&kind)
    }

    pub fn is_raised(&self, kind: ErrorKind) -> bool {
        self.raised.contains(&kind)
    }
}
