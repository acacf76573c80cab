//! Last-read scroll position per conversation.
//!
//! Lets a reopened conversation land where the user left it. Positions
//! older than a day are useless (new messages have moved the list), so reads
//! expire them lazily and [`ScrollPositionStore::clear_expired`] offers a
//! bulk sweep for app startup.

use std::sync::Arc;

use tracing::warn;

use crate::clock::Clock;
use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::models::ScrollPosition;

pub(crate) const SCROLL_PREFIX: &str = "scroll_position_";

const SCROLL_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Expiring per-conversation scroll offsets.
pub struct ScrollPositionStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl ScrollPositionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    /// Overwrite the saved position, optionally anchored to a message id.
    pub async fn save(&self, conversation_id: &str, offset: f64, message_id: Option<&str>) {
        let position = ScrollPosition {
            conversation_id: conversation_id.to_string(),
            offset,
            message_id: message_id.map(str::to_string),
            timestamp_ms: self.clock.now_ms(),
        };
        if let Err(e) = self.try_save(&position).await {
            warn!(conversation_id = %conversation_id, error = %e, "failed to save scroll position");
        }
    }

    /// The saved position, unless it is older than a day.
    pub async fn get(&self, conversation_id: &str) -> Option<ScrollPosition> {
        match self.try_get(conversation_id).await {
            Ok(position) => position,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "failed to read scroll position");
                None
            }
        }
    }

    pub async fn clear(&self, conversation_id: &str) {
        let key = format!("{}{}", SCROLL_PREFIX, conversation_id);
        if let Err(e) = self.kv.remove(&key).await {
            warn!(conversation_id = %conversation_id, error = %e, "failed to clear scroll position");
        }
    }

    /// Sweep every stored position and delete the expired ones.
    ///
    /// Purely a cleanup convenience; lazy expiry on `get` keeps reads
    /// correct without it.
    pub async fn clear_expired(&self) {
        if let Err(e) = self.try_clear_expired().await {
            warn!(error = %e, "failed to sweep expired scroll positions");
        }
    }

    // -----------------------------------------------------------------------
    // Fallible internals
    // -----------------------------------------------------------------------

    async fn try_save(&self, position: &ScrollPosition) -> Result<()> {
        let key = format!("{}{}", SCROLL_PREFIX, position.conversation_id);
        let json = serde_json::to_string(position)?;
        self.kv.set(&key, &json).await
    }

    async fn try_get(&self, conversation_id: &str) -> Result<Option<ScrollPosition>> {
        let key = format!("{}{}", SCROLL_PREFIX, conversation_id);
        let raw = match self.kv.get(&key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let position: ScrollPosition = serde_json::from_str(&raw)?;
        if self.clock.now_ms().saturating_sub(position.timestamp_ms) > SCROLL_TTL_MS {
            self.kv.remove(&key).await?;
            return Ok(None);
        }
        Ok(Some(position))
    }

    async fn try_clear_expired(&self) -> Result<()> {
        let now = self.clock.now_ms();
        for key in self.kv.keys().await? {
            if !key.starts_with(SCROLL_PREFIX) {
                continue;
            }
            let raw = match self.kv.get(&key).await? {
                Some(raw) => raw,
                None => continue,
            };
            let position: ScrollPosition = match serde_json::from_str(&raw) {
                Ok(position) => position,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping corrupt scroll position");
                    continue;
                }
            };
            if now.saturating_sub(position.timestamp_ms) > SCROLL_TTL_MS {
                self.kv.remove(&key).await?;
            }
        }
        Ok(())
    }
}
