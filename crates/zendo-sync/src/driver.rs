//! Periodic background flusher for the outbound queue.
//!
//! Nothing else in the crate owns a timer; without this task someone would
//! have to remember to call [`Outbound::flush_ready`]. The driver ticks on a
//! fixed period (first tick immediately, so a restart drains leftovers right
//! away) and stops cleanly on [`FlushDriver::shutdown`] or when the handle
//! is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::outbound::Outbound;

/// Reasonable default cadence for the embedding client.
pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_secs(5);

/// Handle to the spawned flush task.
pub struct FlushDriver {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl FlushDriver {
    /// Spawn the flush loop on the current runtime.
    pub fn spawn(outbound: Arc<Outbound>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            info!(period_ms = period.as_millis() as u64, "flush driver started");
            let mut ticker = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = outbound.flush_ready().await;
                        if !report.is_empty() {
                            info!(
                                attempted = report.attempted,
                                sent = report.sent,
                                deferred = report.deferred,
                                failed = report.failed,
                                "outbound flush pass"
                            );
                        }
                    }
                    // Resolves on an explicit shutdown send, or with `None`
                    // once the driver handle is dropped.
                    _ = shutdown_rx.recv() => {
                        info!("flush driver shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
    }
}
