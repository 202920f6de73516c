//! Bounded save queue
//!
//! Received messages are pushed without waiting; a fixed set of worker tasks drains
//! the queue into the [`MessageStore`]. A full queue rejects new work so the
//! receive loop never stalls behind storage.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

use super::{Direction, MessageStore, StoredMessage};

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Save queue is full ({0} pending)")]
    Full(usize),

    #[error("Save queue is closed")]
    Closed,
}

/// Result of one save attempt
#[derive(Debug, Clone)]
pub enum SaveReport {
    Saved {
        message: StoredMessage,
    },
    Failed {
        message: StoredMessage,
        error: String,
    },
}

/// Handle for submitting messages to the worker pool
#[derive(Clone)]
pub struct SaveQueue {
    tx: mpsc::Sender<StoredMessage>,
    capacity: usize,
}

impl SaveQueue {
    /// Spawn `workers` tasks draining a queue of `capacity` messages into `store`.
    ///
    /// Workers exit once every `SaveQueue` clone is dropped and the queue is empty.
    pub fn start(
        store: Arc<dyn MessageStore>,
        workers: usize,
        capacity: usize,
        reports: Option<mpsc::Sender<SaveReport>>,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));

        for id in 0..workers.max(1) {
            spawn_worker(id, store.clone(), rx.clone(), reports.clone());
        }

        Self { tx, capacity }
    }

    /// Queue a message without waiting
    pub fn submit(&self, message: StoredMessage) -> Result<(), QueueError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                tracing::warn!("Save queue full, dropping message from {}", message.sender);
                Err(QueueError::Full(self.capacity))
            }
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }
}

fn spawn_worker(
    id: usize,
    store: Arc<dyn MessageStore>,
    rx: Arc<Mutex<mpsc::Receiver<StoredMessage>>>,
    reports: Option<mpsc::Sender<SaveReport>>,
) {
    tokio::spawn(async move {
        loop {
            let next = { rx.lock().await.recv().await };
            let Some(message) = next else {
                break;
            };

            let saved = match message.direction {
                Direction::Received => {
                    store
                        .save_incoming_message(&message.sender, &message.content)
                        .await
                }
                Direction::Sent => store.save_message(&message).await,
            };

            let report = match saved {
                Ok(()) => {
                    tracing::debug!("Saved message from {}", message.sender);
                    SaveReport::Saved { message }
                }
                Err(e) => {
                    tracing::error!("Failed to save message from {}: {}", message.sender, e);
                    SaveReport::Failed {
                        message,
                        error: e.to_string(),
                    }
                }
            };

            if let Some(reports) = &reports {
                if reports.try_send(report).is_err() {
                    tracing::trace!("Save report dropped");
                }
            }
        }

        tracing::debug!("Save worker {} stopped", id);
    });
}
