//! Boundary contracts the dispatcher drives.
//!
//! The sync core never talks to a backend itself. The embedding client
//! supplies these collaborators; tests supply scripted doubles. Voice
//! messages cross two of them: the recording is uploaded first, then the
//! resulting remote URL is sent like any other message.

use async_trait::async_trait;

use crate::error::Result;

/// Durably records a message server-side and returns the server-assigned
/// message id.
#[async_trait]
pub trait SendPipeline: Send + Sync {
    async fn send_text(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_name: &str,
        body: &str,
    ) -> Result<String>;

    /// `remote_url` must already point at uploaded audio; see
    /// [`VoiceUploader`].
    async fn send_voice(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_name: &str,
        remote_url: &str,
        duration_secs: u32,
    ) -> Result<String>;
}

/// Converts a local recording into a fetchable remote URL.
#[async_trait]
pub trait VoiceUploader: Send + Sync {
    async fn upload(
        &self,
        local_uri: &str,
        conversation_id: &str,
        sender_id: &str,
    ) -> Result<String>;
}

/// Reports current connectivity.
///
/// Checked once per send decision and once per flush, never subscribed to;
/// staleness between checks is tolerated because every attempt re-checks.
pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;
}
