//! Per-conversation composition drafts.
//!
//! Two kinds are kept for each conversation: the text being typed and a
//! finished voice take that has not been sent yet. Both expire lazily: a
//! read past the TTL deletes the entry and reports it absent. Text survives
//! a day; recordings only an hour, since a stale take is rarely worth
//! keeping.

use std::sync::Arc;

use tracing::warn;

use crate::clock::Clock;
use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::models::{DraftMessage, DraftRecording};

pub(crate) const MESSAGE_PREFIX: &str = "draft_message_";
pub(crate) const RECORDING_PREFIX: &str = "draft_recording_";

const MESSAGE_TTL_MS: u64 = 24 * 60 * 60 * 1000;
const RECORDING_TTL_MS: u64 = 60 * 60 * 1000;

/// Expiring draft persistence for the composer.
pub struct DraftStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl DraftStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    /// Overwrite the text draft for a conversation, stamped with the current
    /// time.
    pub async fn save_message(&self, conversation_id: &str, content: &str) {
        let draft = DraftMessage {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            timestamp_ms: self.clock.now_ms(),
        };
        if let Err(e) = self.try_save_message(&draft).await {
            warn!(conversation_id = %conversation_id, error = %e, "failed to save draft message");
        }
    }

    /// The saved text draft, unless it is older than a day.
    pub async fn get_message(&self, conversation_id: &str) -> Option<DraftMessage> {
        match self.try_get_message(conversation_id).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "failed to read draft message");
                None
            }
        }
    }

    /// Delete the text draft (sent, or cleared by the user).
    pub async fn clear_message(&self, conversation_id: &str) {
        let key = format!("{}{}", MESSAGE_PREFIX, conversation_id);
        if let Err(e) = self.kv.remove(&key).await {
            warn!(conversation_id = %conversation_id, error = %e, "failed to clear draft message");
        }
    }

    /// Overwrite the unsent voice take for a conversation.
    pub async fn save_recording(&self, conversation_id: &str, local_uri: &str, duration_secs: u32) {
        let draft = DraftRecording {
            conversation_id: conversation_id.to_string(),
            local_uri: local_uri.to_string(),
            duration_secs,
            timestamp_ms: self.clock.now_ms(),
        };
        if let Err(e) = self.try_save_recording(&draft).await {
            warn!(conversation_id = %conversation_id, error = %e, "failed to save draft recording");
        }
    }

    /// The unsent voice take, unless it is older than an hour.
    pub async fn get_recording(&self, conversation_id: &str) -> Option<DraftRecording> {
        match self.try_get_recording(conversation_id).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "failed to read draft recording");
                None
            }
        }
    }

    /// Delete the voice take (sent, or discarded by the user).
    pub async fn clear_recording(&self, conversation_id: &str) {
        let key = format!("{}{}", RECORDING_PREFIX, conversation_id);
        if let Err(e) = self.kv.remove(&key).await {
            warn!(conversation_id = %conversation_id, error = %e, "failed to clear draft recording");
        }
    }

    /// Drop both draft kinds for a conversation.
    pub async fn clear_all(&self, conversation_id: &str) {
        self.clear_message(conversation_id).await;
        self.clear_recording(conversation_id).await;
    }

    // -----------------------------------------------------------------------
    // Fallible internals
    // -----------------------------------------------------------------------

    async fn try_save_message(&self, draft: &DraftMessage) -> Result<()> {
        let key = format!("{}{}", MESSAGE_PREFIX, draft.conversation_id);
        let json = serde_json::to_string(draft)?;
        self.kv.set(&key, &json).await
    }

    async fn try_get_message(&self, conversation_id: &str) -> Result<Option<DraftMessage>> {
        let key = format!("{}{}", MESSAGE_PREFIX, conversation_id);
        let raw = match self.kv.get(&key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let draft: DraftMessage = serde_json::from_str(&raw)?;
        if self.clock.now_ms().saturating_sub(draft.timestamp_ms) > MESSAGE_TTL_MS {
            self.kv.remove(&key).await?;
            return Ok(None);
        }
        Ok(Some(draft))
    }

    async fn try_save_recording(&self, draft: &DraftRecording) -> Result<()> {
        let key = format!("{}{}", RECORDING_PREFIX, draft.conversation_id);
        let json = serde_json::to_string(draft)?;
        self.kv.set(&key, &json).await
    }

    async fn try_get_recording(&self, conversation_id: &str) -> Result<Option<DraftRecording>> {
        let key = format!("{}{}", RECORDING_PREFIX, conversation_id);
        let raw = match self.kv.get(&key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let draft: DraftRecording = serde_json::from_str(&raw)?;
        if self.clock.now_ms().saturating_sub(draft.timestamp_ms) > RECORDING_TTL_MS {
            self.kv.remove(&key).await?;
            return Ok(None);
        }
        Ok(Some(draft))
    }
}
