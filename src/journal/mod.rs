//! Trade journal module
//!
//! Audit trail of entries, stop updates, exits and reconciliations, plus the
//! running trade statistics derived from it

mod types;
mod writer;

pub use types::{open_position, JournalEvent, JournalRecord, TradeStats};
pub use writer::{read_journal, JournalError, TradeJournal};
