//! Domain records persisted through the key-value boundary.
//!
//! Every struct is serde-derived and stored as JSON. Timestamps are
//! milliseconds since the Unix epoch, stamped by the owning store's
//! [`Clock`](crate::Clock).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Message content
// ---------------------------------------------------------------------------

/// What an outgoing message carries.
///
/// Voice content references a local recording that still has to be uploaded;
/// it only becomes a remote URL inside the send pipeline, never in storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text body.
    Text { body: String },
    /// A finished voice recording on local disk.
    Voice { local_uri: String, duration_secs: u32 },
}

impl MessageContent {
    pub fn is_voice(&self) -> bool {
        matches!(self, Self::Voice { .. })
    }
}

// ---------------------------------------------------------------------------
// Outgoing / queued messages
// ---------------------------------------------------------------------------

/// A message the composer wants delivered.
///
/// `id` is client-generated and stable; it is the idempotency key for
/// de-duplication across retries. `timestamp_ms` is the composition time and
/// is only ever used for display ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: MessageContent,
    pub timestamp_ms: u64,
}

impl OutgoingMessage {
    /// Build a text message with a fresh uuid-v4 id.
    pub fn text(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        body: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            content: MessageContent::Text { body: body.into() },
            timestamp_ms,
        }
    }

    /// Build a voice message with a fresh uuid-v4 id.
    pub fn voice(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        local_uri: impl Into<String>,
        duration_secs: u32,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            content: MessageContent::Voice {
                local_uri: local_uri.into(),
                duration_secs,
            },
            timestamp_ms,
        }
    }
}

/// Attempt state of a queued message, shown in the conversation UI.
///
/// Purely presentational: retry eligibility is computed from `retry_count`
/// and `last_retry_ms`, never from this field. A `Failed` entry stays in the
/// queue so the user can retry it manually.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Uploading,
    Failed,
}

/// A message awaiting confirmed delivery, with its retry metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: MessageContent,
    /// Composition time. Never overwritten, even across retries.
    pub timestamp_ms: u64,
    /// Failed attempts so far. Starts at 0.
    pub retry_count: u32,
    /// When we last *tried* (not last succeeded): stamped at enqueue and on
    /// every attempt.
    pub last_retry_ms: u64,
    pub status: QueueStatus,
}

impl QueuedMessage {
    /// Wrap an outgoing message with fresh retry metadata.
    pub(crate) fn new(outgoing: OutgoingMessage, now_ms: u64) -> Self {
        Self {
            id: outgoing.id,
            conversation_id: outgoing.conversation_id,
            sender_id: outgoing.sender_id,
            sender_name: outgoing.sender_name,
            content: outgoing.content,
            timestamp_ms: outgoing.timestamp_ms,
            retry_count: 0,
            last_retry_ms: now_ms,
            status: QueueStatus::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

/// In-progress text composition for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftMessage {
    pub conversation_id: String,
    pub content: String,
    /// Last-write time; drafts expire 24 hours after it.
    pub timestamp_ms: u64,
}

/// A finished but not-yet-sent voice take for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftRecording {
    pub conversation_id: String,
    pub local_uri: String,
    pub duration_secs: u32,
    /// Last-write time; recordings expire after 1 hour.
    pub timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Where the user last was in a conversation's message list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrollPosition {
    pub conversation_id: String,
    /// Scroll offset in the UI's own units (pixels).
    pub offset: f64,
    /// Anchor message at that offset, when the UI knows it.
    pub message_id: Option<String>,
    pub timestamp_ms: u64,
}

/// Resume point inside a voice message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackPosition {
    pub message_id: String,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_json_is_tagged() {
        let voice = MessageContent::Voice {
            local_uri: "file:///tmp/take.m4a".to_string(),
            duration_secs: 12,
        };

        let json = serde_json::to_value(&voice).unwrap();
        assert_eq!(json["type"], "voice");
        assert_eq!(json["local_uri"], "file:///tmp/take.m4a");

        let text = MessageContent::Text {
            body: "hi".to_string(),
        };
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["type"], "text");
    }

    #[test]
    fn test_builders_generate_unique_ids() {
        let a = OutgoingMessage::text("c1", "u1", "Ava", "hello", 1);
        let b = OutgoingMessage::text("c1", "u1", "Ava", "hello", 1);
        assert_ne!(a.id, b.id);
        assert!(!a.content.is_voice());

        let v = OutgoingMessage::voice("c1", "u1", "Ava", "file:///tmp/v.m4a", 9, 1);
        assert!(v.content.is_voice());
    }
}
