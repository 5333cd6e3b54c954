//! Relay error types
//!
//! These surface only in logs: a message that fails to decode is
//! dropped, never propagated into the host's lifecycle handlers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Payload was not a valid message
    #[error("Failed to decode relay message: {0}")]
    Decode(#[from] serde_json::Error),

    /// Request URL could not be parsed
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    /// Request used a scheme other than the reserved one
    #[error("Unexpected scheme: {0}")]
    UnexpectedScheme(String),

    /// Request named an unknown channel
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Message kind did not match the channel it arrived on
    #[error("Message kind does not belong on channel {0}")]
    ChannelMismatch(String),
}
