//! Error types for the coordination core.

/// Infrastructure error for the sync layer.
///
/// Domain outcomes (fetch rejections, remote failures, backoff timeouts) are
/// expressed as events or return values, not as this type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Invalid backoff configuration.
    #[error("backoff error: {0}")]
    Backoff(String),

    /// State persistence error.
    #[error("store error: {0}")]
    Store(String),

    /// Clock source error (bind failure, missing token).
    #[error("clock error: {0}")]
    Clock(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// External collaborator error.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SyncError>;
