//! Error types for chanstr operations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for chanstr operations.
pub type Result<T> = std::result::Result<T, ChanError>;

/// Main error type for the client library.
///
/// Malformed-but-tolerable event data (bad `dim` values, unknown tag shapes,
/// duplicate reply links) and dead quote references never surface here; they
/// degrade to missing fields instead.
#[derive(Error, Debug)]
pub enum ChanError {
    /// The requested event is not (yet) visible on any relay.
    #[error("not found: {0}")]
    NotFound(String),

    /// An authoring action lacks something it needs before touching the network.
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// The board identifier is not in the registry.
    #[error("unknown board: {0}")]
    UnknownBoard(String),

    /// Relay connection or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A relay did not answer within the configured deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Every relay refused the published event.
    #[error("rejected by relay: {0}")]
    Rejected(String),

    /// Key handling or signature failures.
    #[error("signing error: {0}")]
    Signing(String),

    /// Session storage failures.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChanError {
    /// Creates a new not-found error.
    pub fn not_found<T: ToString>(msg: T) -> Self {
        Self::NotFound(msg.to_string())
    }

    /// Creates a new missing-prerequisite error.
    pub fn missing<T: ToString>(msg: T) -> Self {
        Self::MissingPrerequisite(msg.to_string())
    }

    /// Creates a new transport error.
    pub fn transport<T: ToString>(msg: T) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Creates a new signing error.
    pub fn signing<T: ToString>(msg: T) -> Self {
        Self::Signing(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Whether a read that failed this way may succeed on a later attempt.
    ///
    /// Events propagate between relays with some delay, so "not found" is
    /// treated like a flaky connection. Cancellation and caller mistakes are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Transport(_) | Self::Timeout(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChanError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<secp256k1::Error> for ChanError {
    fn from(e: secp256k1::Error) -> Self {
        Self::Signing(e.to_string())
    }
}
