//! Bounded redemption history, most recent first.

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::result::RedemptionResult;

/// Entries kept by the bundled history stores.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// History store failure.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Reading or writing the backing file failed.
    #[error("history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The backing file is not a JSON array of results.
    #[error("history file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Receives every result the pipeline produces.
#[async_trait::async_trait]
pub trait RedemptionHistory: fmt::Debug + Send + Sync {
    /// Stores `result`, replacing any entry with the same id.
    async fn record(&self, result: &RedemptionResult) -> Result<(), HistoryError>;

    /// Stored results, most recent first.
    async fn entries(&self) -> Result<Vec<RedemptionResult>, HistoryError>;
}

/// Puts `result` at the front, dropping an older entry with the same id and
/// anything past `capacity`.
fn insert_front(entries: &mut Vec<RedemptionResult>, result: &RedemptionResult, capacity: usize) {
    entries.retain(|entry| entry.id != result.id);
    entries.insert(0, result.clone());
    entries.truncate(capacity);
}

/// History held in memory.
#[derive(Debug)]
pub struct InMemoryHistory {
    entries: Mutex<Vec<RedemptionResult>>,
    capacity: usize,
}

impl InMemoryHistory {
    /// Creates an empty history keeping at most `capacity` entries.
    pub const fn with_capacity(capacity: usize) -> Self {
        Self { entries: Mutex::new(Vec::new()), capacity }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

#[async_trait::async_trait]
impl RedemptionHistory for InMemoryHistory {
    async fn record(&self, result: &RedemptionResult) -> Result<(), HistoryError> {
        insert_front(&mut self.entries.lock(), result, self.capacity);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<RedemptionResult>, HistoryError> {
        Ok(self.entries.lock().clone())
    }
}

/// History stored as a JSON array in a file.
///
/// A missing file reads as an empty history. Writes from this handle are
/// serialized; concurrent writers from other processes are not.
#[derive(Debug)]
pub struct JsonFileHistory {
    path: PathBuf,
    capacity: usize,
    write_lock: AsyncMutex<()>,
}

impl JsonFileHistory {
    /// History at `path` with the default capacity.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), capacity: DEFAULT_HISTORY_CAPACITY, write_lock: AsyncMutex::new(()) }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<RedemptionResult>, HistoryError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(HistoryError::Io { path: self.path.clone(), source }),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&raw)
            .map_err(|source| HistoryError::Malformed { path: self.path.clone(), source })
    }
}

#[async_trait::async_trait]
impl RedemptionHistory for JsonFileHistory {
    async fn record(&self, result: &RedemptionResult) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        insert_front(&mut entries, result, self.capacity);

        let encoded = serde_json::to_vec_pretty(&entries)
            .map_err(|source| HistoryError::Malformed { path: self.path.clone(), source })?;
        tokio::fs::write(&self.path, encoded)
            .await
            .map_err(|source| HistoryError::Io { path: self.path.clone(), source })?;
        debug!(target: "redeem-history", path = %self.path.display(), id = %result.id, entries = entries.len(), "recorded redemption");
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<RedemptionResult>, HistoryError> {
        self.load().await
    }
}
