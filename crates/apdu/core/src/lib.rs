//! Core traits and types for APDU (Application Protocol Data Unit) operations
//!
//! This crate provides the foundational types and traits for talking to
//! contactless identity documents with ISO/IEC 7816-4 APDUs.
//!
//! ## Overview
//!
//! - [`Command`] for building commands, including command chaining
//! - [`Response`] and [`StatusWord`] for interpreting card answers
//! - [`CardTransport`] for moving raw bytes to and from a card, with the
//!   `TagLost` / `Timeout` distinction surfaced in [`TransportError`]
//! - [`atr`] for extracting historical bytes used to identify a document
//! - [`discovery`] for waiting on a tap and handing out exactly one transport per tap
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

// Main modules
pub mod atr;
pub mod command;
pub mod discovery;
pub mod response;
pub mod transport;

// Core error types
mod error;
pub use error::{Error, Result};

// Re-exports for common types
pub use command::{Command, ExpectedLength, MAX_SHORT_DATA};
pub use discovery::{DiscoveryError, DiscoveryManager, DiscoveryStatus, TagReader};
pub use response::status::StatusWord;
pub use response::Response;
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, Command, Error, Response, Result,
        command::ExpectedLength,
        response::error::ResponseError,
        response::status::StatusWord,
        transport::{CardTransport, TransportError},
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    // Test the basic types are re-exported correctly
    #[test]
    fn test_reexports() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x0C);
        assert_eq!(cmd.header(), [0x00, 0xA4, 0x04, 0x0C]);

        let resp = Response::success(Some(Bytes::from_static(&[0x01, 0x02, 0x03])));
        assert!(resp.is_success());
        assert_eq!(resp.data(), &[0x01, 0x02, 0x03]);
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
