//! Error types for the RoomLink connectivity core

use thiserror::Error;

/// Result type alias for connectivity operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the connectivity core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Directory service error (listing candidate edges failed)
    #[error("Edge directory error: {0}")]
    Directory(String),

    /// Every candidate edge failed all latency probes
    #[error("No reachable edge among {candidates} candidates")]
    NoReachableEdge {
        /// Number of candidates that were probed
        candidates: usize,
    },

    /// Underlying signaling transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The signaling channel did not reach a healthy connected state in time
    #[error("Channel connect timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Operation issued against a session in the wrong state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Media transport attach/detach failure
    #[error("Media transport error: {0}")]
    Media(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
