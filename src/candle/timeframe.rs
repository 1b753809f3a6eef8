//! Candle interval parsing

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned for an unsupported timeframe string
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unsupported timeframe: {0}")]
pub struct TimeframeError(pub String);

/// Fixed candle interval, e.g. "15m" or "1h"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    minutes: u32,
}

/// Resolutions accepted by the exchange candle endpoint
const SUPPORTED: &[(&str, u32)] = &[
    ("1m", 1),
    ("3m", 3),
    ("5m", 5),
    ("15m", 15),
    ("30m", 30),
    ("1h", 60),
    ("2h", 120),
    ("4h", 240),
    ("6h", 360),
    ("1d", 1440),
];

impl Timeframe {
    /// Build a timeframe from a whole number of minutes
    pub fn from_minutes(minutes: u32) -> Result<Self, TimeframeError> {
        SUPPORTED
            .iter()
            .find(|(_, m)| *m == minutes)
            .map(|(_, m)| Self { minutes: *m })
            .ok_or_else(|| TimeframeError(format!("{}m", minutes)))
    }

    /// Interval length
    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes as i64)
    }

    /// Interval length in milliseconds
    pub fn millis(&self) -> i64 {
        self.minutes as i64 * 60_000
    }

    /// Exchange resolution label ("15m", "1h", ...)
    pub fn as_str(&self) -> &'static str {
        SUPPORTED
            .iter()
            .find(|(_, m)| *m == self.minutes)
            .map(|(label, _)| *label)
            .unwrap_or("1m")
    }

    /// Start of the interval containing `ts`
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let ms = ts.timestamp_millis();
        let start = ms - ms.rem_euclid(self.millis());
        Utc.timestamp_millis_opt(start).single().unwrap_or(ts)
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self { minutes: 15 }
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        SUPPORTED
            .iter()
            .find(|(label, _)| *label == lower)
            .map(|(_, m)| Self { minutes: *m })
            .ok_or_else(|| TimeframeError(s.to_string()))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
