//! APDU response definitions
//!
//! This module provides types for working with APDU responses
//! according to ISO/IEC 7816-4.

pub mod error;
pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use error::ResponseError;
use status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data
    payload: Option<Bytes>,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(payload: Option<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload: payload.filter(|p| !p.is_empty()),
            status: status.into(),
        }
    }

    /// Create a success response
    pub fn success(payload: Option<Bytes>) -> Self {
        Self::new(payload, StatusWord::new(0x90, 0x00))
    }

    /// Create an error response from a status word
    pub fn error(status: impl Into<StatusWord>) -> Self {
        Self {
            payload: None,
            status: status.into(),
        }
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(data: &[u8]) -> Result<Self, ResponseError> {
        let Some(split) = data.len().checked_sub(2) else {
            return Err(ResponseError::Incomplete);
        };
        let (payload, sw) = data.split_at(split);
        let status = StatusWord::new(sw[0], sw[1]);

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.len(),
            "Parsed APDU response"
        );

        Ok(Self::new(Some(Bytes::copy_from_slice(payload)), status))
    }

    /// Get the response payload, if any
    pub const fn payload(&self) -> &Option<Bytes> {
        &self.payload
    }

    /// Get the response data, empty when the card returned none
    pub fn data(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Get the status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Serialize back to wire format: data followed by SW1 SW2
    pub fn to_bytes(&self) -> Bytes {
        let data = self.data();
        let mut buf = BytesMut::with_capacity(data.len() + 2);
        buf.put_slice(data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }

    /// Take the data of a successful response, or the failing status word
    pub fn into_result(self) -> Result<Bytes, ResponseError> {
        if self.is_success() {
            Ok(self.payload.unwrap_or_default())
        } else {
            Err(ResponseError::Status(self.status))
        }
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = ResponseError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(data)
    }
}
