//! Resume points for voice messages.
//!
//! A long voice message interrupted mid-listen resumes where it stopped.
//! Positions only persist when they represent meaningful progress: past the
//! first second and not within the final second. Anything outside that band
//! clears the entry, so finished or barely-started playback restarts from
//! the top. Entries expire after seven days.

use std::sync::Arc;

use tracing::warn;

use crate::clock::Clock;
use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::models::PlaybackPosition;

pub(crate) const PLAYBACK_PREFIX: &str = "playback_position_";

const PLAYBACK_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;
/// Margin at both ends of a clip inside which progress is not worth saving.
const EDGE_MARGIN_MS: u64 = 1000;

/// Expiring per-message playback positions.
pub struct PlaybackPositionStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl PlaybackPositionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    /// Persist the current position, or clear it when the position carries
    /// no meaningful progress (near the start or the end of the clip).
    pub async fn save(&self, message_id: &str, position_ms: u64, duration_ms: u64) {
        if position_ms < EDGE_MARGIN_MS || position_ms >= duration_ms.saturating_sub(EDGE_MARGIN_MS)
        {
            self.clear(message_id).await;
            return;
        }

        let position = PlaybackPosition {
            message_id: message_id.to_string(),
            position_ms,
            duration_ms,
            timestamp_ms: self.clock.now_ms(),
        };
        if let Err(e) = self.try_save(&position).await {
            warn!(message_id = %message_id, error = %e, "failed to save playback position");
        }
    }

    /// The saved resume point, unless it is older than seven days.
    pub async fn get(&self, message_id: &str) -> Option<PlaybackPosition> {
        match self.try_get(message_id).await {
            Ok(position) => position,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "failed to read playback position");
                None
            }
        }
    }

    pub async fn clear(&self, message_id: &str) {
        let key = format!("{}{}", PLAYBACK_PREFIX, message_id);
        if let Err(e) = self.kv.remove(&key).await {
            warn!(message_id = %message_id, error = %e, "failed to clear playback position");
        }
    }

    /// Sweep every stored position and delete the expired ones.
    pub async fn clear_expired(&self) {
        if let Err(e) = self.try_clear_expired().await {
            warn!(error = %e, "failed to sweep expired playback positions");
        }
    }

    // -----------------------------------------------------------------------
    // Fallible internals
    // -----------------------------------------------------------------------

    async fn try_save(&self, position: &PlaybackPosition) -> Result<()> {
        let key = format!("{}{}", PLAYBACK_PREFIX, position.message_id);
        let json = serde_json::to_string(position)?;
        self.kv.set(&key, &json).await
    }

    async fn try_get(&self, message_id: &str) -> Result<Option<PlaybackPosition>> {
        let key = format!("{}{}", PLAYBACK_PREFIX, message_id);
        let raw = match self.kv.get(&key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let position: PlaybackPosition = serde_json::from_str(&raw)?;
        if self.clock.now_ms().saturating_sub(position.timestamp_ms) > PLAYBACK_TTL_MS {
            self.kv.remove(&key).await?;
            return Ok(None);
        }
        Ok(Some(position))
    }

    async fn try_clear_expired(&self) -> Result<()> {
        let now = self.clock.now_ms();
        for key in self.kv.keys().await? {
            if !key.starts_with(PLAYBACK_PREFIX) {
                continue;
            }
            let raw = match self.kv.get(&key).await? {
                Some(raw) => raw,
                None => continue,
            };
            let position: PlaybackPosition = match serde_json::from_str(&raw) {
                Ok(position) => position,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping corrupt playback position");
                    continue;
                }
            };
            if now.saturating_sub(position.timestamp_ms) > PLAYBACK_TTL_MS {
                self.kv.remove(&key).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryStore;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn store_with_clock() -> (PlaybackPositionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(9_000_000));
        let store = PlaybackPositionStore::new(Arc::new(MemoryStore::new()), clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn test_meaningful_progress_round_trips() {
        let (store, _clock) = store_with_clock();

        store.save("msg-1", 5_000, 10_000).await;

        let position = store.get("msg-1").await.unwrap();
        assert_eq!(position.position_ms, 5_000);
        assert_eq!(position.duration_ms, 10_000);
    }

    #[tokio::test]
    async fn test_edges_are_suppressed() {
        let (store, _clock) = store_with_clock();

        // Less than a second in.
        store.save("msg-1", 500, 10_000).await;
        assert!(store.get("msg-1").await.is_none());

        // Within a second of the end.
        store.save("msg-1", 9_500, 10_000).await;
        assert!(store.get("msg-1").await.is_none());

        // An out-of-band save clears a previously stored position.
        store.save("msg-1", 5_000, 10_000).await;
        assert!(store.get("msg-1").await.is_some());
        store.save("msg-1", 9_990, 10_000).await;
        assert!(store.get("msg-1").await.is_none());
    }

    #[tokio::test]
    async fn test_tiny_clips_never_persist() {
        let (store, _clock) = store_with_clock();

        store.save("msg-1", 400, 800).await;
        assert!(store.get("msg-1").await.is_none());
    }

    #[tokio::test]
    async fn test_expires_after_seven_days() {
        let (store, clock) = store_with_clock();
        store.save("msg-1", 5_000, 10_000).await;

        clock.advance(6 * DAY_MS);
        assert!(store.get("msg-1").await.is_some());

        clock.advance(2 * DAY_MS);
        assert!(store.get("msg-1").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_expired_sweeps_only_stale_entries() {
        let (store, clock) = store_with_clock();
        store.save("old", 5_000, 10_000).await;

        clock.advance(8 * DAY_MS);
        store.save("fresh", 6_000, 10_000).await;

        store.clear_expired().await;

        assert!(store.get("old").await.is_none());
        assert!(store.get("fresh").await.is_some());
    }
}
