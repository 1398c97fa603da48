//! Error types for Tapedeck

use std::io;
use thiserror::Error;

/// Result type for Tapedeck operations
pub type Result<T> = std::result::Result<T, TapedeckError>;

/// Errors that can occur in Tapedeck
#[derive(Debug, Error)]
pub enum TapedeckError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid recording file or request format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// No recording exists for the path in the active sequence
    #[error("No recording found for {path} in sequence '{sequence}'")]
    NoRecording {
        /// Active sequence name
        sequence: String,
        /// Request path
        path: String,
    },

    /// Every recorded interaction for the path has already been replayed
    #[error(
        "Sequence exhausted: all {recorded} recorded interaction(s) for {path} in sequence '{sequence}' have been replayed"
    )]
    Exhausted {
        /// Active sequence name
        sequence: String,
        /// Request path
        path: String,
        /// Number of interactions on record
        recorded: usize,
    },

    /// A stored interaction could not be turned back into a response
    #[error("Malformed recording at {location} (interaction {index}): {reason}")]
    MalformedStorage {
        /// Storage file the interaction came from
        location: String,
        /// Position of the interaction within the file
        index: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Forwarding to the upstream failed
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Request/response too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Invalid sequence name
    #[error("Invalid sequence name: {0}")]
    InvalidSequenceName(String),

    /// The write pipeline is no longer accepting jobs
    #[error("Write pipeline closed")]
    PipelineClosed,

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}
