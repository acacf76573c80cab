//! The send-or-queue decision and the queue dispatcher.
//!
//! Composing never blocks on connectivity: online sends go straight through
//! the pipeline while offline sends land in the durable queue. A flush walks
//! the queue and retries whatever the backoff policy says is due. Transient
//! failures climb the ladder; permanent failures and exhausted ladders park
//! the item as failed until the user retries it by hand.

use std::sync::Arc;

use tracing::{debug, info, warn};
use zendo_store::{
    Clock, DraftStore, MessageContent, OutboundQueue, OutgoingMessage, QueueStatus, QueuedMessage,
};

use crate::backoff::RetryPolicy;
use crate::error::{Result, SendError};
use crate::pipeline::{NetworkMonitor, SendPipeline, VoiceUploader};

/// How a composed message left the building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered immediately; the server assigned this message id.
    Sent { message_id: String },
    /// Stored in the outbound queue for a later flush.
    Queued,
}

/// Tally of one flush pass over the queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Items that were due and actually tried.
    pub attempted: usize,
    /// Delivered and dequeued.
    pub sent: usize,
    /// Failed transiently; still queued for a later attempt.
    pub deferred: usize,
    /// Marked failed, either permanently rejected or out of attempts.
    pub failed: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.attempted == 0
    }
}

enum Attempt {
    Delivered(String),
    Deferred(SendError),
    Failed(SendError),
}

/// Outbound message dispatcher.
pub struct Outbound {
    queue: Arc<OutboundQueue>,
    drafts: Arc<DraftStore>,
    pipeline: Arc<dyn SendPipeline>,
    uploader: Arc<dyn VoiceUploader>,
    network: Arc<dyn NetworkMonitor>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Outbound {
    pub fn new(
        queue: Arc<OutboundQueue>,
        drafts: Arc<DraftStore>,
        pipeline: Arc<dyn SendPipeline>,
        uploader: Arc<dyn VoiceUploader>,
        network: Arc<dyn NetworkMonitor>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            drafts,
            pipeline,
            uploader,
            network,
            policy,
            clock,
        }
    }

    /// Deliver a freshly composed message, or queue it when offline.
    ///
    /// On success (either path) the conversation's matching draft is cleared,
    /// since the composition it cached is now in flight. An online send
    /// failure propagates to the caller with the draft intact; rejected
    /// sends do not fall back into the queue.
    pub async fn send_or_enqueue(&self, message: OutgoingMessage) -> Result<SendOutcome> {
        if !self.network.is_online() {
            let entry = self.queue.enqueue(message).await;
            self.clear_matching_draft(&entry.conversation_id, &entry.content)
                .await;
            info!(id = %entry.id, conversation_id = %entry.conversation_id, "offline, queued message");
            return Ok(SendOutcome::Queued);
        }

        let message_id = self
            .send_now(
                &message.conversation_id,
                &message.sender_id,
                &message.sender_name,
                &message.content,
            )
            .await?;
        self.clear_matching_draft(&message.conversation_id, &message.content)
            .await;
        debug!(id = %message.id, message_id = %message_id, "sent message directly");
        Ok(SendOutcome::Sent { message_id })
    }

    /// Try every queued message that is due under the backoff policy.
    ///
    /// A no-op while offline, so waiting items keep their attempt budget
    /// for when connectivity is actually back. Items already marked failed
    /// are left for [`Outbound::retry_now`].
    pub async fn flush_ready(&self) -> FlushReport {
        if !self.network.is_online() {
            debug!("offline, skipping outbound flush");
            return FlushReport::default();
        }

        let now = self.clock.now_ms();
        let queued = self.queue.list().await;
        let mut report = FlushReport::default();

        for item in self.policy.ready(&queued, now) {
            if item.status == QueueStatus::Failed {
                continue;
            }
            report.attempted += 1;
            match self.attempt(&item).await {
                Attempt::Delivered(_) => report.sent += 1,
                Attempt::Deferred(_) => report.deferred += 1,
                Attempt::Failed(_) => report.failed += 1,
            }
        }
        report
    }

    /// Attempt one queued message immediately, ignoring backoff, ceiling
    /// and failed status. This backs the "failed, tap to retry" affordance.
    ///
    /// Returns a permanent error for ids no longer in the queue. While
    /// offline it fails transiently without consuming an attempt.
    pub async fn retry_now(&self, id: &str) -> Result<SendOutcome> {
        if !self.network.is_online() {
            return Err(SendError::Transient("network is offline".to_string()));
        }

        let queued = self.queue.list().await;
        let item = match queued.iter().find(|m| m.id == id) {
            Some(item) => item,
            None => {
                return Err(SendError::Permanent(format!(
                    "message {} is not queued",
                    id
                )))
            }
        };

        match self.attempt(item).await {
            Attempt::Delivered(message_id) => Ok(SendOutcome::Sent { message_id }),
            Attempt::Deferred(e) | Attempt::Failed(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// One delivery attempt with full bookkeeping.
    ///
    /// The attempt is recorded before the outcome is known, so a crash or a
    /// fast-failing pipeline still walks the ladder instead of hammering the
    /// backend.
    async fn attempt(&self, item: &QueuedMessage) -> Attempt {
        self.queue.mark_attempt(&item.id).await;
        let attempts = item.retry_count + 1;

        if let MessageContent::Voice { local_uri, .. } = &item.content {
            if !recording_exists(local_uri).await {
                let e = SendError::Permanent(format!("local recording missing: {}", local_uri));
                self.queue.set_status(&item.id, QueueStatus::Failed).await;
                warn!(id = %item.id, error = %e, "marking queued message failed");
                return Attempt::Failed(e);
            }
            self.queue.set_status(&item.id, QueueStatus::Uploading).await;
        }

        let outcome = self
            .send_now(
                &item.conversation_id,
                &item.sender_id,
                &item.sender_name,
                &item.content,
            )
            .await;

        match outcome {
            Ok(message_id) => {
                self.queue.dequeue(&item.id).await;
                info!(id = %item.id, message_id = %message_id, attempts = attempts, "delivered queued message");
                Attempt::Delivered(message_id)
            }
            Err(e @ SendError::Permanent(_)) => {
                self.queue.set_status(&item.id, QueueStatus::Failed).await;
                warn!(id = %item.id, error = %e, "marking queued message failed");
                Attempt::Failed(e)
            }
            Err(e @ SendError::Transient(_)) => {
                if self.policy.delay_ms(attempts).is_none() {
                    self.queue.set_status(&item.id, QueueStatus::Failed).await;
                    warn!(id = %item.id, attempts = attempts, "retry ladder exhausted, marking failed");
                    Attempt::Failed(e)
                } else {
                    self.queue.set_status(&item.id, QueueStatus::Pending).await;
                    debug!(id = %item.id, attempts = attempts, error = %e, "send failed, retrying later");
                    Attempt::Deferred(e)
                }
            }
        }
    }

    /// Push one message through the pipeline, uploading voice first.
    async fn send_now(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_name: &str,
        content: &MessageContent,
    ) -> Result<String> {
        match content {
            MessageContent::Text { body } => {
                self.pipeline
                    .send_text(conversation_id, sender_id, sender_name, body)
                    .await
            }
            MessageContent::Voice {
                local_uri,
                duration_secs,
            } => {
                let remote_url = self
                    .uploader
                    .upload(local_uri, conversation_id, sender_id)
                    .await?;
                self.pipeline
                    .send_voice(
                        conversation_id,
                        sender_id,
                        sender_name,
                        &remote_url,
                        *duration_secs,
                    )
                    .await
            }
        }
    }

    async fn clear_matching_draft(&self, conversation_id: &str, content: &MessageContent) {
        match content {
            MessageContent::Text { .. } => self.drafts.clear_message(conversation_id).await,
            MessageContent::Voice { .. } => self.drafts.clear_recording(conversation_id).await,
        }
    }
}

/// Whether the recording behind a queued voice message is still on disk.
/// The OS may evict cached audio between enqueue and flush.
async fn recording_exists(local_uri: &str) -> bool {
    let path = local_uri.strip_prefix("file://").unwrap_or(local_uri);
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::sync::Mutex;
    use zendo_store::{ManualClock, MemoryStore};

    /// Pipeline double that fails a fixed number of sends before succeeding,
    /// recording everything it delivers.
    struct FakePipeline {
        failures_left: Mutex<u32>,
        failure: SendError,
        delivered: Mutex<Vec<String>>,
    }

    impl FakePipeline {
        fn always_ok() -> Self {
            Self::failing(0, SendError::Transient("unused".to_string()))
        }

        fn failing(budget: u32, failure: SendError) -> Self {
            Self {
                failures_left: Mutex::new(budget),
                failure,
                delivered: Mutex::new(Vec::new()),
            }
        }

        async fn try_deliver(&self, payload: &str) -> Result<String> {
            let mut left = self.failures_left.lock().await;
            if *left > 0 {
                *left -= 1;
                return Err(self.failure.clone());
            }
            self.delivered.lock().await.push(payload.to_string());
            Ok(format!("srv-{}", payload))
        }

        async fn delivered(&self) -> Vec<String> {
            self.delivered.lock().await.clone()
        }
    }

    #[async_trait]
    impl SendPipeline for FakePipeline {
        async fn send_text(
            &self,
            _conversation_id: &str,
            _sender_id: &str,
            _sender_name: &str,
            body: &str,
        ) -> Result<String> {
            self.try_deliver(body).await
        }

        async fn send_voice(
            &self,
            _conversation_id: &str,
            _sender_id: &str,
            _sender_name: &str,
            remote_url: &str,
            _duration_secs: u32,
        ) -> Result<String> {
            self.try_deliver(remote_url).await
        }
    }

    struct FakeUploader {
        calls: AtomicU32,
    }

    impl FakeUploader {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl VoiceUploader for FakeUploader {
        async fn upload(
            &self,
            _local_uri: &str,
            conversation_id: &str,
            _sender_id: &str,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://blobs.test/{}/audio.m4a", conversation_id))
        }
    }

    struct FakeNetwork {
        online: AtomicBool,
    }

    impl FakeNetwork {
        fn new(online: bool) -> Self {
            Self {
                online: AtomicBool::new(online),
            }
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }
    }

    impl NetworkMonitor for FakeNetwork {
        fn is_online(&self) -> bool {
            self.online.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        outbound: Outbound,
        queue: Arc<OutboundQueue>,
        drafts: Arc<DraftStore>,
        clock: Arc<ManualClock>,
        network: Arc<FakeNetwork>,
        pipeline: Arc<FakePipeline>,
        uploader: Arc<FakeUploader>,
    }

    fn harness(online: bool, pipeline: FakePipeline) -> Harness {
        let kv: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let queue = Arc::new(OutboundQueue::new(kv.clone(), clock.clone()));
        let drafts = Arc::new(DraftStore::new(kv, clock.clone()));
        let network = Arc::new(FakeNetwork::new(online));
        let pipeline = Arc::new(pipeline);
        let uploader = Arc::new(FakeUploader::new());

        let outbound = Outbound::new(
            queue.clone(),
            drafts.clone(),
            pipeline.clone(),
            uploader.clone(),
            network.clone(),
            RetryPolicy::default(),
            clock.clone(),
        );
        Harness {
            outbound,
            queue,
            drafts,
            clock,
            network,
            pipeline,
            uploader,
        }
    }

    fn text(id: &str, body: &str) -> OutgoingMessage {
        OutgoingMessage {
            id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            sender_id: "user-1".to_string(),
            sender_name: "Ava".to_string(),
            content: MessageContent::Text {
                body: body.to_string(),
            },
            timestamp_ms: 7,
        }
    }

    fn voice(id: &str, local_uri: &str) -> OutgoingMessage {
        OutgoingMessage {
            id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            sender_id: "user-1".to_string(),
            sender_name: "Ava".to_string(),
            content: MessageContent::Voice {
                local_uri: local_uri.to_string(),
                duration_secs: 11,
            },
            timestamp_ms: 7,
        }
    }

    #[tokio::test]
    async fn test_online_send_bypasses_queue_and_clears_draft() {
        let h = harness(true, FakePipeline::always_ok());
        h.drafts.save_message("conv-1", "hi there").await;

        let outcome = h.outbound.send_or_enqueue(text("m1", "hi there")).await;

        assert_eq!(
            outcome.unwrap(),
            SendOutcome::Sent {
                message_id: "srv-hi there".to_string()
            }
        );
        assert!(h.queue.list().await.is_empty());
        assert_eq!(h.pipeline.delivered().await, vec!["hi there"]);
        assert!(h.drafts.get_message("conv-1").await.is_none());
    }

    #[tokio::test]
    async fn test_offline_send_queues_and_clears_draft() {
        let h = harness(false, FakePipeline::always_ok());
        h.drafts.save_message("conv-1", "hi there").await;

        let outcome = h.outbound.send_or_enqueue(text("m1", "hi there")).await;

        assert_eq!(outcome.unwrap(), SendOutcome::Queued);
        let queued = h.queue.list().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].retry_count, 0);
        assert_eq!(queued[0].status, QueueStatus::Pending);
        assert!(h.pipeline.delivered().await.is_empty());
        assert!(h.drafts.get_message("conv-1").await.is_none());
    }

    #[tokio::test]
    async fn test_online_failure_propagates_and_keeps_draft() {
        let h = harness(
            true,
            FakePipeline::failing(1, SendError::Transient("relay timeout".to_string())),
        );
        h.drafts.save_message("conv-1", "hi there").await;

        let outcome = h.outbound.send_or_enqueue(text("m1", "hi there")).await;

        assert_eq!(
            outcome.unwrap_err(),
            SendError::Transient("relay timeout".to_string())
        );
        // A rejected online send does not fall back into the queue.
        assert!(h.queue.list().await.is_empty());
        assert!(h.drafts.get_message("conv-1").await.is_some());
    }

    #[tokio::test]
    async fn test_flush_waits_for_backoff() {
        let h = harness(false, FakePipeline::always_ok());
        h.outbound.send_or_enqueue(text("m1", "hi")).await.unwrap();
        h.network.set_online(true);

        // Enqueued just now: the first retry delay has not elapsed.
        let report = h.outbound.flush_ready().await;
        assert!(report.is_empty());
        assert_eq!(h.queue.list().await.len(), 1);

        h.clock.advance(1_000);
        let report = h.outbound.flush_ready().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.sent, 1);
        assert!(h.queue.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_flush_is_a_noop_while_offline() {
        let h = harness(false, FakePipeline::always_ok());
        h.outbound.send_or_enqueue(text("m1", "hi")).await.unwrap();

        h.clock.advance(60_000);
        let report = h.outbound.flush_ready().await;

        assert_eq!(report, FlushReport::default());
        // No attempt budget was burned while disconnected.
        assert_eq!(h.queue.list().await[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_flush_retries_through_backoff_until_delivered() {
        let h = harness(
            false,
            FakePipeline::failing(2, SendError::Transient("relay timeout".to_string())),
        );
        h.outbound.send_or_enqueue(text("m1", "hi")).await.unwrap();
        h.network.set_online(true);

        h.clock.advance(1_000);
        let report = h.outbound.flush_ready().await;
        assert_eq!((report.attempted, report.deferred), (1, 1));
        assert_eq!(h.queue.list().await[0].retry_count, 1);

        // Not due again until the doubled delay has passed.
        h.clock.advance(1_999);
        assert!(h.outbound.flush_ready().await.is_empty());

        h.clock.advance(1);
        let report = h.outbound.flush_ready().await;
        assert_eq!((report.attempted, report.deferred), (1, 1));

        h.clock.advance(4_000);
        let report = h.outbound.flush_ready().await;
        assert_eq!((report.attempted, report.sent), (1, 1));
        assert!(h.queue.list().await.is_empty());
        assert_eq!(h.pipeline.delivered().await, vec!["hi"]);
    }

    #[tokio::test]
    async fn test_exhausted_ladder_marks_failed_and_stops_retrying() {
        let h = harness(
            false,
            FakePipeline::failing(99, SendError::Transient("relay down".to_string())),
        );
        h.outbound.send_or_enqueue(text("m1", "hi")).await.unwrap();
        h.network.set_online(true);

        for _ in 0..4 {
            h.clock.advance(60_000);
            let report = h.outbound.flush_ready().await;
            assert_eq!((report.attempted, report.deferred), (1, 1));
        }

        h.clock.advance(60_000);
        let report = h.outbound.flush_ready().await;
        assert_eq!((report.attempted, report.failed), (1, 1));

        let queued = h.queue.list().await;
        assert_eq!(queued[0].retry_count, 5);
        assert_eq!(queued[0].status, QueueStatus::Failed);

        // Stays queued but is never flushed again, however long we wait.
        h.clock.advance(u64::MAX / 2);
        assert!(h.outbound.flush_ready().await.is_empty());
        assert_eq!(h.queue.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_short_circuits() {
        let h = harness(
            false,
            FakePipeline::failing(99, SendError::Permanent("payload rejected".to_string())),
        );
        h.outbound.send_or_enqueue(text("m1", "hi")).await.unwrap();
        h.network.set_online(true);

        h.clock.advance(1_000);
        let report = h.outbound.flush_ready().await;
        assert_eq!((report.attempted, report.failed), (1, 1));

        let queued = h.queue.list().await;
        assert_eq!(queued[0].status, QueueStatus::Failed);
        assert_eq!(queued[0].retry_count, 1);

        // One rejection was enough; no more automatic attempts.
        h.clock.advance(60_000);
        assert!(h.outbound.flush_ready().await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_now_ignores_backoff_and_ceiling() {
        let h = harness(
            false,
            FakePipeline::failing(5, SendError::Transient("relay down".to_string())),
        );
        h.outbound.send_or_enqueue(text("m1", "hi")).await.unwrap();
        h.network.set_online(true);

        // No backoff wait: attempts run back to back.
        for _ in 0..5 {
            assert!(h.outbound.retry_now("m1").await.is_err());
        }
        assert_eq!(h.queue.list().await[0].status, QueueStatus::Failed);
        assert_eq!(h.queue.list().await[0].retry_count, 5);

        // Manual retry still works on a spent, failed item.
        let outcome = h.outbound.retry_now("m1").await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Sent {
                message_id: "srv-hi".to_string()
            }
        );
        assert!(h.queue.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_now_edge_cases() {
        let h = harness(false, FakePipeline::always_ok());
        h.outbound.send_or_enqueue(text("m1", "hi")).await.unwrap();

        // Offline: fail fast without consuming an attempt.
        let err = h.outbound.retry_now("m1").await.unwrap_err();
        assert!(!err.is_permanent());
        assert_eq!(h.queue.list().await[0].retry_count, 0);

        h.network.set_online(true);
        let err = h.outbound.retry_now("unknown").await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_voice_flush_uploads_then_sends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.m4a");
        std::fs::write(&path, b"audio").unwrap();
        let local_uri = format!("file://{}", path.display());

        let h = harness(false, FakePipeline::always_ok());
        h.drafts.save_recording("conv-1", &local_uri, 11).await;
        h.outbound
            .send_or_enqueue(voice("m1", &local_uri))
            .await
            .unwrap();
        assert!(h.drafts.get_recording("conv-1").await.is_none());
        h.network.set_online(true);

        h.clock.advance(1_000);
        let report = h.outbound.flush_ready().await;

        assert_eq!((report.attempted, report.sent), (1, 1));
        assert_eq!(h.uploader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.pipeline.delivered().await,
            vec!["https://blobs.test/conv-1/audio.m4a"]
        );
        assert!(h.queue.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_voice_with_evicted_recording_fails_permanently() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("evicted.m4a");

        let h = harness(false, FakePipeline::always_ok());
        h.outbound
            .send_or_enqueue(voice("m1", gone.to_str().unwrap()))
            .await
            .unwrap();
        h.network.set_online(true);

        h.clock.advance(1_000);
        let report = h.outbound.flush_ready().await;

        assert_eq!((report.attempted, report.failed), (1, 1));
        assert_eq!(h.queue.list().await[0].status, QueueStatus::Failed);
        // The upload was never started.
        assert_eq!(h.uploader.calls.load(Ordering::SeqCst), 0);
    }
}
