//! Append-only JSON-lines trade journal

use super::{JournalEvent, JournalRecord};
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const JOURNAL_BUFFER: usize = 256;

/// Journal errors
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed journal line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Handle to the journal writer task.
///
/// Recording never blocks: records go through a bounded channel and are
/// dropped with a warning when the writer falls behind.
pub struct TradeJournal {
    path: PathBuf,
    tx: mpsc::Sender<JournalRecord>,
    writer: JoinHandle<()>,
}

impl TradeJournal {
    /// Open (creating if needed) the journal at `path` and start the writer
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, rx) = mpsc::channel(JOURNAL_BUFFER);
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            Self::run_writer(rx, file, writer_path).await;
        });

        tracing::info!(path = %path.display(), "Trade journal opened");
        Ok(Self { path, tx, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an event stamped with the current time
    pub fn record(&self, event: JournalEvent) {
        let kind = event.kind();
        let record = JournalRecord {
            at: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.try_send(record) {
            metrics::counter!("journal_dropped_total").increment(1);
            tracing::warn!(kind, error = %e, "Journal record dropped");
        }
    }

    /// Flush queued records and stop the writer
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            tracing::error!(error = %e, "Journal writer task failed");
        }
    }

    async fn run_writer(
        mut rx: mpsc::Receiver<JournalRecord>,
        mut file: tokio::fs::File,
        path: PathBuf,
    ) {
        while let Some(record) = rx.recv().await {
            let mut line = match serde_json::to_string(&record) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize journal record");
                    continue;
                }
            };
            line.push('\n');
            if let Err(e) = file.write_all(line.as_bytes()).await {
                tracing::error!(path = %path.display(), error = %e, "Failed to write journal");
                continue;
            }
            if let Err(e) = file.flush().await {
                tracing::error!(path = %path.display(), error = %e, "Failed to flush journal");
            }
        }
        if let Err(e) = file.sync_all().await {
            tracing::warn!(error = %e, "Failed to sync journal on close");
        }
    }
}

/// Read every record of the journal at `path`; a missing file is empty
pub async fn read_journal(path: impl AsRef<Path>) -> Result<Vec<JournalRecord>, JournalError> {
    let file = match tokio::fs::File::open(path.as_ref()).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    let mut number = 0;
    while let Some(line) = lines.next_line().await? {
        number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| JournalError::Malformed {
            line: number,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}
