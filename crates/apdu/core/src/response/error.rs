//! Error types specific to APDU responses

use thiserror::Error;

use super::status::StatusWord;

/// Error for APDU response processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// Fewer than the two status bytes
    #[error("Incomplete response")]
    Incomplete,

    /// Card answered with a status other than `90 00`
    #[error("Status {0} ({desc})", desc = .0.description())]
    Status(StatusWord),
}
