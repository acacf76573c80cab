use thiserror::Error;

/// Failure from the send pipeline or uploader, tagged by retry semantics.
///
/// The tag drives the dispatcher: transient failures climb the backoff
/// ladder, permanent ones mark the item failed immediately instead of
/// burning four more doomed attempts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Worth retrying (network down, timeout, transient server trouble).
    #[error("Transient send failure: {0}")]
    Transient(String),

    /// Retrying cannot succeed (rejected payload, missing local file).
    #[error("Permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SendError>;
