//! Error types specific to card transport

use thiserror::Error;

/// Transport error type
///
/// `TagLost` and `Timeout` are kept apart from every other failure: the first
/// ends the card session, the second only the operation in flight.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The tag left the field or the card was removed mid-exchange
    #[error("Tag was lost")]
    TagLost,

    /// No response within the bounded window
    #[error("Timed out waiting for card response")]
    Timeout,

    /// Connection error
    #[error("Failed to connect to device")]
    Connection,

    /// Transmission error
    #[error("Failed to transmit data")]
    Transmission,

    /// Operation cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Other error
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the card is gone and the session must be torn down
    pub const fn is_tag_lost(&self) -> bool {
        matches!(self, Self::TagLost)
    }
}
