//! Durable local journal for batches the sink refused.
//!
//! The journal is an append-only UTF-8 text file holding one JSON-encoded
//! batch per line. Entries are written with flush-to-disk semantics and
//! removed only after the whole file's contents have been confirmed
//! written to the sink in a single pass; the truncation is all-or-nothing.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::point::Batch;
use crate::sink::{SinkConnection, SinkError};

/// Errors surfaced by journal operations.
#[derive(Debug)]
pub enum JournalError {
    /// Reading, appending, or truncating the journal file failed
    Io(std::io::Error),

    /// A batch could not be serialized for appending
    Encode(serde_json::Error),

    /// The sink rejected the reconciliation write
    Sink(SinkError),
}

impl std::fmt::Display for JournalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JournalError::Io(e) => write!(f, "journal file error: {}", e),
            JournalError::Encode(e) => write!(f, "failed to encode batch: {}", e),
            JournalError::Sink(e) => write!(f, "reconciliation write failed: {}", e),
        }
    }
}

impl std::error::Error for JournalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JournalError::Io(e) => Some(e),
            JournalError::Encode(e) => Some(e),
            JournalError::Sink(e) => Some(e),
        }
    }
}

/// Append-only durable store of pending batches.
///
/// Accessed only from the collector's task; no locking discipline is
/// required under that single-writer arrangement.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one batch as a single line, durable before returning.
    ///
    /// The file is created on first use and synced to disk after every
    /// append so a crash immediately afterwards cannot lose the entry.
    pub async fn append(&self, batch: &Batch) -> Result<(), JournalError> {
        let line = serde_json::to_string(batch).map_err(JournalError::Encode)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(JournalError::Io)?;
        file.write_all(line.as_bytes())
            .await
            .map_err(JournalError::Io)?;
        file.write_all(b"\n").await.map_err(JournalError::Io)?;
        file.sync_all().await.map_err(JournalError::Io)?;
        Ok(())
    }

    /// Reconcile all journaled batches against the sink.
    ///
    /// An absent or empty journal is a no-op returning 0 without touching
    /// the sink. Otherwise every line is parsed as a batch (a malformed
    /// line is logged and skipped, never blocking the rest) and all parsed
    /// batches are concatenated into one write call. Only if that call
    /// succeeds is the journal truncated to empty. Returns the number of
    /// reconciled batches.
    pub async fn flush(&self, sink: &SinkConnection) -> Result<usize, JournalError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "journal absent, nothing to reconcile");
                return Ok(0);
            }
            Err(e) => return Err(JournalError::Io(e)),
        };

        let mut combined = Batch::new();
        let mut entries = 0usize;
        let mut skipped = 0usize;
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Batch>(line) {
                Ok(batch) => {
                    entries += 1;
                    combined.extend(batch);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(line = index + 1, error = %e, "skipping malformed journal entry");
                }
            }
        }

        if combined.is_empty() {
            if skipped > 0 {
                warn!(skipped, "journal contained no readable entries");
            } else {
                debug!("journal empty, nothing to reconcile");
            }
            return Ok(0);
        }

        sink.write(&combined).await.map_err(JournalError::Sink)?;

        // Truncate only after the sink confirmed the whole pass.
        let file = File::create(&self.path).await.map_err(JournalError::Io)?;
        file.sync_all().await.map_err(JournalError::Io)?;

        info!(
            batches = entries,
            points = combined.len(),
            skipped,
            "journal reconciled"
        );
        Ok(entries)
    }
}
