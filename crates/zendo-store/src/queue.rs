//! Offline outbound queue.
//!
//! Messages composed while disconnected wait here until a flush delivers
//! them. The whole queue is one JSON array under a single key, rewritten on
//! every mutation; an internal mutex serializes those read-modify-write
//! cycles so concurrent enqueues and attempt bookkeeping cannot clobber each
//! other.
//!
//! Storage faults never reach callers: a queue that cannot be read behaves
//! as empty, a mutation that cannot be persisted is logged and dropped. The
//! composer must keep working with a broken disk.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::clock::Clock;
use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::models::{OutgoingMessage, QueueStatus, QueuedMessage};

/// Single storage key holding the serialized queue.
pub const QUEUE_KEY: &str = "offline_queue";

/// Durable FIFO of messages awaiting delivery.
pub struct OutboundQueue {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// Serializes every read-modify-write cycle on [`QUEUE_KEY`].
    lock: Mutex<()>,
}

impl OutboundQueue {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            clock,
            lock: Mutex::new(()),
        }
    }

    /// Append a message with fresh retry metadata and return the stored
    /// entry.
    ///
    /// Re-enqueueing an id already present replaces the old entry, so a
    /// message can never be delivered twice from one queue.
    pub async fn enqueue(&self, message: OutgoingMessage) -> QueuedMessage {
        let _guard = self.lock.lock().await;
        let entry = QueuedMessage::new(message, self.clock.now_ms());
        if let Err(e) = self.try_enqueue(&entry).await {
            warn!(id = %entry.id, error = %e, "failed to persist enqueued message");
        }
        entry
    }

    /// Remove a delivered or abandoned message. Unknown ids are a no-op.
    pub async fn dequeue(&self, id: &str) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.try_dequeue(id).await {
            warn!(id = %id, error = %e, "failed to dequeue message");
        }
    }

    /// All queued messages, oldest first. Empty on storage failure.
    pub async fn list(&self) -> Vec<QueuedMessage> {
        let _guard = self.lock.lock().await;
        match self.read_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read outbound queue");
                Vec::new()
            }
        }
    }

    /// Update the attempt state shown in the UI. Unknown ids are a no-op.
    pub async fn set_status(&self, id: &str, status: QueueStatus) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.try_set_status(id, status).await {
            warn!(id = %id, error = %e, "failed to update queued message status");
        }
    }

    /// Record one delivery attempt: bump `retry_count` and stamp
    /// `last_retry_ms` with the current time.
    ///
    /// Called before the attempt's outcome is known, so a crash mid-send
    /// still counts against the backoff ladder instead of producing a
    /// retry storm.
    pub async fn mark_attempt(&self, id: &str) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.try_mark_attempt(id).await {
            warn!(id = %id, error = %e, "failed to record delivery attempt");
        }
    }

    /// Drop the whole queue (logout / account reset).
    pub async fn clear(&self) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.kv.remove(QUEUE_KEY).await {
            warn!(error = %e, "failed to clear outbound queue");
        }
    }

    // -----------------------------------------------------------------------
    // Fallible internals (callers hold the lock)
    // -----------------------------------------------------------------------

    async fn try_enqueue(&self, entry: &QueuedMessage) -> Result<()> {
        let mut entries = self.read_entries().await?;
        entries.retain(|m| m.id != entry.id);
        entries.push(entry.clone());
        self.write_entries(&entries).await
    }

    async fn try_dequeue(&self, id: &str) -> Result<()> {
        let mut entries = self.read_entries().await?;
        let before = entries.len();
        entries.retain(|m| m.id != id);
        if entries.len() == before {
            return Ok(());
        }
        self.write_entries(&entries).await
    }

    async fn try_set_status(&self, id: &str, status: QueueStatus) -> Result<()> {
        let mut entries = self.read_entries().await?;
        match entries.iter_mut().find(|m| m.id == id) {
            Some(entry) => entry.status = status,
            None => return Ok(()),
        }
        self.write_entries(&entries).await
    }

    async fn try_mark_attempt(&self, id: &str) -> Result<()> {
        let now = self.clock.now_ms();
        let mut entries = self.read_entries().await?;
        match entries.iter_mut().find(|m| m.id == id) {
            Some(entry) => {
                entry.retry_count += 1;
                entry.last_retry_ms = now;
            }
            None => return Ok(()),
        }
        self.write_entries(&entries).await
    }

    /// Decode the stored queue. A corrupt payload reads as empty (with a
    /// warning) rather than wedging every queue operation; the next mutation
    /// overwrites it.
    async fn read_entries(&self) -> Result<Vec<QueuedMessage>> {
        let raw = match self.kv.get(QUEUE_KEY).await? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(error = %e, "outbound queue payload is corrupt, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn write_entries(&self, entries: &[QueuedMessage]) -> Result<()> {
        let json = serde_json::to_string(entries)?;
        self.kv.set(QUEUE_KEY, &json).await
    }
}
