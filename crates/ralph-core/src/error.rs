//! Error types shared across the Ralph workspace

use thiserror::Error;

/// Result type alias for Ralph operations
pub type Result<T> = std::result::Result<T, RalphError>;

/// Errors that can occur while driving an agent backend
///
/// Everything that is not a safety trip, a signal, or a configuration error
/// is recoverable: the driver records it as an iteration failure and moves
/// on (backoff, fallback adapter, or state reset).
#[derive(Debug, Error)]
pub enum RalphError {
    /// The agent binary could not be spawned (missing or not executable)
    #[error("Failed to spawn agent process: {0}")]
    SpawnFailure(String),

    /// `start()` was called while the subprocess is already running
    #[error("Subprocess client is already running")]
    AlreadyRunning,

    /// An operation required a running subprocess
    #[error("Subprocess client is not running")]
    NotRunning,

    /// Malformed frame, missing protocol fields, or handshake violation
    #[error("Protocol failure: {0}")]
    ProtocolFailure(String),

    /// No response arrived within the per-call deadline
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// A response arrived but did not carry the required shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The pending request was drained by client shutdown
    #[error("Client shut down before a response arrived")]
    Shutdown,

    /// Application-level JSON-RPC error returned by the agent
    #[error("Agent error {code}: {message}")]
    Application { code: i64, message: String },

    /// Configuration out of bounds (rejected at startup)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO errors (file operations, pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RalphError {
    /// True when the driver may retry or fall back after this error.
    ///
    /// Safety trips and config errors terminate the run; everything else is
    /// an iteration-level failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RalphError::Config(_))
    }
}
