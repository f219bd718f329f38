//! Error types for the message bus

use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// JetStream error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Consume error
    #[error("Consume error: {0}")]
    Consume(String),

    /// Record failed to parse
    #[error("Malformed record at offset {offset}: {reason}")]
    Malformed {
        /// Stream sequence of the bad record
        offset: u64,
        /// Parse failure detail
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
