//! Error types for PC/SC transport

use std::fmt;

use eidcard_apdu_core::TransportError;

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    NoReadersAvailable,

    /// Reader not found
    ReaderNotFound(String),

    /// No card present in reader
    NoCard(String),

    /// Other error
    Other(String),
}

impl fmt::Display for PcscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcsc(e) => write!(f, "PC/SC error: {}", e),
            Self::NoReadersAvailable => write!(f, "No readers available"),
            Self::ReaderNotFound(r) => write!(f, "Reader not found: {}", r),
            Self::NoCard(r) => write!(f, "No card present in reader: {}", r),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Map a PC/SC failure to the transport taxonomy
pub(crate) fn transport_error(error: pcsc::Error) -> TransportError {
    match error {
        pcsc::Error::RemovedCard | pcsc::Error::ResetCard | pcsc::Error::NoSmartcard => {
            TransportError::TagLost
        }
        pcsc::Error::Timeout => TransportError::Timeout,
        pcsc::Error::Cancelled => TransportError::Cancelled,
        pcsc::Error::NoService
        | pcsc::Error::ServiceStopped
        | pcsc::Error::ReaderUnavailable
        | pcsc::Error::UnknownReader => TransportError::Connection,
        other => TransportError::Other(other.to_string()),
    }
}

impl From<PcscError> for TransportError {
    fn from(error: PcscError) -> Self {
        match error {
            PcscError::Pcsc(e) => transport_error(e),
            PcscError::NoCard(_) => Self::TagLost,
            PcscError::NoReadersAvailable | PcscError::ReaderNotFound(_) => Self::Connection,
            PcscError::Other(msg) => Self::Other(msg),
        }
    }
}
