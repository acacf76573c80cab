//! # zendo-store
//!
//! Local persistence for the Zendo chat client: composition drafts, scroll
//! and playback positions, and the offline outbound-message queue.
//!
//! Every record is written through the [`KeyValueStore`] boundary as a JSON
//! value under a prefixed key, so the backend is swappable: [`MemoryStore`]
//! for tests and ephemeral sessions, [`SqliteStore`] for durable on-disk
//! storage. Time comes from an injected [`Clock`], which keeps the TTL and
//! retry bookkeeping deterministic under test.

pub mod clock;
pub mod drafts;
pub mod kv;
pub mod models;
pub mod playback;
pub mod queue;
pub mod scroll;
pub mod sqlite;

mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use drafts::DraftStore;
pub use error::{Result, StoreError};
pub use kv::{KeyValueStore, MemoryStore};
pub use models::*;
pub use playback::PlaybackPositionStore;
pub use queue::OutboundQueue;
pub use scroll::ScrollPositionStore;
pub use sqlite::SqliteStore;
