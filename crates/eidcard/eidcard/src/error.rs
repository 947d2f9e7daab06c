use derive_more::Display;
use eidcard_apdu_core::response::error::ResponseError;
use eidcard_apdu_core::{StatusWord, TransportError};

use crate::types::CodeType;

/// Result type for card session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why the PACE handshake did not produce a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PaceFailure {
    /// The card rejected the password (`63 00`)
    #[error("wrong CAN")]
    WrongCan,

    /// The card's authentication token did not match ours
    #[error("chip authentication token mismatch")]
    TokenMismatch,

    /// The card answered with something that is not a valid handshake frame
    #[error("handshake failed: {0}")]
    Handshake(&'static str),
}

/// Why a secure messaging frame was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityFailure {
    /// Checksum over the frame does not verify with the current counter
    #[error("MAC mismatch")]
    MacMismatch,

    /// Protected status object differs from the trailing status word
    #[error("protected status differs from status word")]
    StatusMismatch,

    /// Decrypted data is not ISO/IEC 7816-4 padded
    #[error("invalid padding")]
    Padding,

    /// Card refused our frame (`69 87` / `69 88`)
    #[error("card rejected secure messaging frame ({0})")]
    Rejected(StatusWord),

    /// Frame structure is wrong
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Error type for card session operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Tag left the field during an exchange
    #[error("Tag was lost")]
    TagLost,

    /// Card did not answer within the transport's window
    #[error("Card did not respond in time")]
    Timeout,

    /// Wrong CAN or failed handshake
    #[error("PACE tunnel failed: {0}")]
    PaceTunnel(PaceFailure),

    /// MAC or counter mismatch after the tunnel was established
    #[error("Secure channel integrity failure: {0}")]
    ChannelIntegrity(IntegrityFailure),

    /// Wrong PIN or PUK
    #[error("Wrong {code}, {retries_left} attempts left")]
    CodeVerification {
        /// Code that was rejected
        code: CodeType,
        /// Attempts left before the card locks the code
        retries_left: u8,
    },

    /// Card answered with an unexpected status word
    #[error("Card returned {status} ({})", status.description())]
    ApduResponse {
        /// Status word returned by the card
        status: StatusWord,
    },

    /// Operation needs an established PACE tunnel
    #[error("Secure tunnel is not established")]
    TunnelNotEstablished,

    /// Session was closed; create a new one
    #[error("Session is closed")]
    SessionClosed,

    /// Historical bytes match no known document
    #[error("Unsupported card")]
    UnsupportedCard,

    /// Code has the wrong length or contains non-digits
    #[error("Invalid {0} format")]
    InvalidCode(CodeType),

    /// Caller supplied an unusable argument
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    /// Card returned data that could not be interpreted
    #[error("Invalid data: {0}")]
    InvalidData(&'static str),

    /// Remaining transport failures
    #[error(transparent)]
    Transport(TransportError),
}

/// Flat error category, for callers that branch on the kind of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    /// [`Error::TagLost`]
    TagLost,
    /// [`Error::Timeout`]
    Timeout,
    /// [`Error::PaceTunnel`]
    PaceTunnel,
    /// [`Error::ChannelIntegrity`]
    ChannelIntegrity,
    /// [`Error::CodeVerification`]
    CodeVerification,
    /// [`Error::ApduResponse`]
    ApduResponse,
    /// [`Error::TunnelNotEstablished`]
    TunnelNotEstablished,
    /// [`Error::SessionClosed`]
    SessionClosed,
    /// [`Error::UnsupportedCard`]
    UnsupportedCard,
    /// [`Error::InvalidCode`] and [`Error::InvalidInput`]
    InvalidInput,
    /// [`Error::InvalidData`]
    InvalidData,
    /// [`Error::Transport`]
    Transport,
}

impl Error {
    /// Category of this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::TagLost => ErrorKind::TagLost,
            Self::Timeout => ErrorKind::Timeout,
            Self::PaceTunnel(_) => ErrorKind::PaceTunnel,
            Self::ChannelIntegrity(_) => ErrorKind::ChannelIntegrity,
            Self::CodeVerification { .. } => ErrorKind::CodeVerification,
            Self::ApduResponse { .. } => ErrorKind::ApduResponse,
            Self::TunnelNotEstablished => ErrorKind::TunnelNotEstablished,
            Self::SessionClosed => ErrorKind::SessionClosed,
            Self::UnsupportedCard => ErrorKind::UnsupportedCard,
            Self::InvalidCode(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidData(_) => ErrorKind::InvalidData,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// A code verification failure that exhausted the retry counter
    pub const fn is_locked(&self) -> bool {
        matches!(
            self,
            Self::CodeVerification {
                retries_left: 0,
                ..
            }
        )
    }

    /// Remaining attempts reported with a code verification failure
    pub const fn retries_left(&self) -> Option<u8> {
        match self {
            Self::CodeVerification { retries_left, .. } => Some(*retries_left),
            _ => None,
        }
    }

    pub(crate) const fn status(status: StatusWord) -> Self {
        Self::ApduResponse { status }
    }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::TagLost => Self::TagLost,
            TransportError::Timeout => Self::Timeout,
            other => Self::Transport(other),
        }
    }
}

impl From<ResponseError> for Error {
    fn from(error: ResponseError) -> Self {
        match error {
            ResponseError::Incomplete => Self::InvalidData("incomplete response"),
            ResponseError::Status(status) => Self::status(status),
        }
    }
}

impl From<eidcard_apdu_core::Error> for Error {
    fn from(error: eidcard_apdu_core::Error) -> Self {
        use eidcard_apdu_core::Error as Apdu;

        match error {
            Apdu::Transport(e) => e.into(),
            Apdu::Response(e) => e.into(),
            Apdu::InvalidCommandLength(_) => Self::InvalidInput("invalid command length"),
            Apdu::DataTooLong(_) => Self::InvalidInput("command data too long"),
        }
    }
}

impl From<PaceFailure> for Error {
    fn from(failure: PaceFailure) -> Self {
        Self::PaceTunnel(failure)
    }
}

impl From<IntegrityFailure> for Error {
    fn from(failure: IntegrityFailure) -> Self {
        Self::ChannelIntegrity(failure)
    }
}
