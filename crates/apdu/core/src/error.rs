//! Error types for APDU operations

use crate::response::error::ResponseError;
use crate::transport::TransportError;

/// Core error type for APDU operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response error
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Raw command bytes do not form a valid short APDU
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Data field does not fit a short APDU and must be chained
    #[error("Command data too long for a short APDU: {0} bytes")]
    DataTooLong(usize),
}

/// Result type for APDU operations
pub type Result<T> = std::result::Result<T, Error>;
