//! Message store module
//!
//! The persistence sink that received chat messages are written to. The transport
//! only depends on the [`MessageStore`] trait; [`JsonlStore`] is the file-backed
//! implementation used by the command line shell.

mod queue;

pub use queue::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rejected by store: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which way a message travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Sent,
}

/// A chat message as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Peer address (IP only, no port)
    pub sender: String,
    pub content: String,
    pub direction: Direction,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

impl StoredMessage {
    pub fn new(sender: impl Into<String>, content: impl Into<String>, direction: Direction) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            direction,
            timestamp: unix_now(),
        }
    }

    pub fn received(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(sender, content, Direction::Received)
    }

    pub fn sent(peer: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(peer, content, Direction::Sent)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Persistence sink for chat messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save_message(&self, message: &StoredMessage) -> StoreResult<()>;

    async fn save_incoming_message(&self, sender: &str, content: &str) -> StoreResult<()> {
        self.save_message(&StoredMessage::received(sender, content)).await
    }
}

/// Appends one JSON object per line to a file
pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every stored message; a missing file is an empty history
    pub async fn load(&self) -> StoreResult<Vec<StoredMessage>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl MessageStore for JsonlStore {
    async fn save_message(&self, message: &StoredMessage) -> StoreResult<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(())
    }
}
