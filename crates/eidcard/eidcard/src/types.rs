//! Value types shared by the session, the card profiles and callers

use std::fmt;
use std::str::FromStr;

use derive_more::Display;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{Error, Result};

/// Longest code any supported document accepts, and the width codes are padded to
pub const MAX_CODE_LENGTH: usize = 12;

/// Secret codes protecting the keys on the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CodeType {
    /// Authentication PIN
    #[display("PIN1")]
    Pin1,
    /// Signing PIN
    #[display("PIN2")]
    Pin2,
    /// Unblocking key for PIN1 and PIN2
    #[display("PUK")]
    Puk,
}

impl CodeType {
    /// All code types in the order cards list them
    pub const ALL: [Self; 3] = [Self::Pin1, Self::Pin2, Self::Puk];

    /// Shortest code the document accepts
    pub const fn min_length(self) -> usize {
        match self {
            Self::Pin1 => 4,
            Self::Pin2 => 5,
            Self::Puk => 8,
        }
    }

    /// Check the length and character set of a code before it is sent to the card
    pub fn validate(self, code: &[u8]) -> Result<()> {
        if code.len() < self.min_length()
            || code.len() > MAX_CODE_LENGTH
            || !code.iter().all(u8::is_ascii_digit)
        {
            return Err(Error::InvalidCode(self));
        }
        Ok(())
    }

    /// Validate `code` and right-pad it with `filler` to [`MAX_CODE_LENGTH`] bytes
    pub(crate) fn pad(self, code: &[u8], filler: u8) -> Result<Zeroizing<Vec<u8>>> {
        self.validate(code)?;
        let mut padded = Zeroizing::new(vec![filler; MAX_CODE_LENGTH]);
        padded[..code.len()].copy_from_slice(code);
        Ok(padded)
    }
}

/// Certificates stored on the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CertificateType {
    /// Certificate of the authentication key (PIN1)
    #[display("authentication")]
    Authentication,
    /// Certificate of the qualified signing key (PIN2)
    #[display("signing")]
    Signing,
}

/// DER-encoded X.509 certificate read from the document
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    kind: CertificateType,
    der: Vec<u8>,
}

impl Certificate {
    pub(crate) const fn new(kind: CertificateType, der: Vec<u8>) -> Self {
        Self { kind, der }
    }

    /// Which key this certificate belongs to
    pub const fn kind(&self) -> CertificateType {
        self.kind
    }

    /// Raw DER bytes
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Take ownership of the DER bytes
    pub fn into_der(self) -> Vec<u8> {
        self.der
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("kind", &self.kind)
            .field("len", &self.der.len())
            .finish()
    }
}

/// Card Access Number printed on the document, the PACE password
///
/// The buffer is wiped when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Can(String);

impl Can {
    /// Validate and wrap a CAN; it must be a non-empty string of ASCII digits
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            // Wipe the rejected input too
            let mut value = value;
            value.zeroize();
            return Err(Error::InvalidInput("CAN must be a non-empty string of digits"));
        }
        Ok(Self(value))
    }

    /// UTF-8 bytes fed to the PACE key derivation
    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for Can {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Debug for Can {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Can(***)")
    }
}
