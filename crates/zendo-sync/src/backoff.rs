//! Exponential backoff ladder for queued messages.
//!
//! Delays double per failed attempt starting at one second. Once the ladder
//! is exhausted the item is never offered for automatic retry again; it
//! stays queued so the user can retry it by hand.

use zendo_store::QueuedMessage;

/// Retry timing rules. Pure data, no side effects, no knowledge of status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Attempts after which automatic retry stops.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// 1 s, 2 s, 4 s, 8 s, 16 s, then give up.
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Wait required after attempt number `retry_count`, or `None` once the
    /// ladder is exhausted.
    pub fn delay_ms(&self, retry_count: u32) -> Option<u64> {
        if retry_count >= self.max_attempts {
            return None;
        }
        let factor = 1u64 << retry_count.min(16);
        Some(self.base_delay_ms.saturating_mul(factor))
    }

    /// Whether a queued message is due for another attempt at `now_ms`.
    ///
    /// Status is deliberately not consulted here; eligibility is purely a
    /// function of attempt count and elapsed time.
    pub fn is_ready(&self, message: &QueuedMessage, now_ms: u64) -> bool {
        match self.delay_ms(message.retry_count) {
            Some(delay) => now_ms.saturating_sub(message.last_retry_ms) >= delay,
            None => false,
        }
    }

    /// The subset of `messages` due at `now_ms`, original order preserved.
    pub fn ready(&self, messages: &[QueuedMessage], now_ms: u64) -> Vec<QueuedMessage> {
        messages
            .iter()
            .filter(|m| self.is_ready(m, now_ms))
            .cloned()
            .collect()
    }
}
