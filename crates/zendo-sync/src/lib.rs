//! # zendo-sync
//!
//! Outbound delivery for the Zendo chat client: the send-or-queue decision,
//! exponential-backoff retries over the offline queue, and the background
//! driver that flushes it.
//!
//! The crate owns no transport. The embedding client provides the
//! [`SendPipeline`], [`VoiceUploader`] and [`NetworkMonitor`] collaborators;
//! everything here decides when to call them and how to treat their
//! failures.

pub mod backoff;
pub mod driver;
pub mod outbound;
pub mod pipeline;

mod error;

pub use backoff::RetryPolicy;
pub use driver::{FlushDriver, DEFAULT_FLUSH_PERIOD};
pub use error::{Result, SendError};
pub use outbound::{FlushReport, Outbound, SendOutcome};
pub use pipeline::{NetworkMonitor, SendPipeline, VoiceUploader};
