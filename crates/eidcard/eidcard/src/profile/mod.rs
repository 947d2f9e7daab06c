//! Command dialects of the supported documents
//!
//! A profile turns session operations into the APDU sequence one document
//! family understands. Profiles never hold state; everything they send goes
//! through the [`Link`] handed in by the session.

mod id1;
mod thales;

use derive_more::Display;
use eidcard_apdu_core::Command;
use iso7816_tlv::ber::{Tlv, Value};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::channel::Link;
use crate::commands::read::{MAX_READ_CHUNK, read_binary};
use crate::error::{Error, Result};
use crate::personal_data::{PersonalData, RECORD_COUNT};
use crate::types::{CertificateType, CodeType};

pub(crate) use id1::Id1;
pub(crate) use thales::Thales;

/// Identity document family, told apart by the historical bytes of the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CardKind {
    /// IDEMIA ID1 platform
    #[display("ID1")]
    Id1,
    /// Thales platform
    #[display("Thales")]
    Thales,
}

impl CardKind {
    const ID1_HISTORICAL_BYTES: [&'static [u8]; 2] = [
        &[0x00, 0x12, 0x23, 0x3F, 0x53, 0x65, 0x49, 0x44, 0x0F, 0x90, 0x00],
        &[0x00, 0x12, 0x23, 0x3F, 0x54, 0x65, 0x49, 0x44, 0x32, 0x0F, 0x90, 0x00],
    ];
    const THALES_HISTORICAL_BYTES: &'static [u8] = &[
        0x80, 0x31, 0xD8, 0x53, 0x65, 0x49, 0x44, 0x64, 0xB0, 0x85, 0x05, 0x10, 0x12, 0x23, 0x3F,
    ];

    /// Identify the document from the historical bytes of its ATR or ATS
    pub fn detect(historical_bytes: &[u8]) -> Option<Self> {
        if Self::ID1_HISTORICAL_BYTES
            .iter()
            .any(|known| *known == historical_bytes)
        {
            Some(Self::Id1)
        } else if historical_bytes == Self::THALES_HISTORICAL_BYTES {
            Some(Self::Thales)
        } else {
            None
        }
    }

    pub(crate) fn profile(self) -> &'static dyn CardProfile {
        match self {
            Self::Id1 => &Id1,
            Self::Thales => &Thales,
        }
    }
}

/// Operations a document family implements over an established tunnel
pub(crate) trait CardProfile: Send + Sync {
    fn kind(&self) -> CardKind;

    /// Byte used to right-pad codes to twelve bytes
    fn code_filler(&self) -> u8;

    /// Command to send before PACE, if the document needs one
    fn pace_preamble(&self) -> Option<Command>;

    /// The eight raw records of the personal data file
    fn personal_records(&self, link: &mut dyn Link) -> Result<Vec<String>>;

    fn certificate(&self, link: &mut dyn Link, kind: CertificateType) -> Result<Vec<u8>>;

    fn code_retry_counter(&self, link: &mut dyn Link, code: CodeType) -> Result<u8>;

    fn authenticate(&self, link: &mut dyn Link, pin1: &[u8], hash: &[u8]) -> Result<Vec<u8>>;

    fn calculate_signature(&self, link: &mut dyn Link, pin2: &[u8], hash: &[u8])
    -> Result<Vec<u8>>;

    fn decrypt(&self, link: &mut dyn Link, pin1: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    fn change_code(
        &self,
        link: &mut dyn Link,
        code: CodeType,
        current: &[u8],
        new: &[u8],
    ) -> Result<()>;

    fn unblock_code(&self, link: &mut dyn Link, puk: &[u8], code: CodeType, new: &[u8])
    -> Result<()>;

    /// Validate a code and pad it the way this document expects
    fn pad(&self, code: CodeType, value: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        code.pad(value, self.code_filler())
    }

    fn personal_data(&self, link: &mut dyn Link) -> Result<PersonalData> {
        let records = self.personal_records(link)?;
        debug!(kind = %self.kind(), records = records.len(), "Read personal data file");
        Ok(PersonalData::from_records(&records))
    }
}

/// Decode one personal data record
fn record_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_owned()
}

/// Read records `50 01` to `50 08` with `read` doing select and read of one record
fn read_records(
    link: &mut dyn Link,
    mut read: impl FnMut(&mut dyn Link, [u8; 2]) -> Result<Vec<u8>>,
) -> Result<Vec<String>> {
    (1..=RECORD_COUNT as u8)
        .map(|index| read(&mut *link, [0x50, index]).map(|bytes| record_text(&bytes)))
        .collect()
}

/// READ BINARY the current EF from offset zero
///
/// Stops after `size` bytes when it is known, after a chunk shorter than
/// requested, or when the card reports the end of the file.
fn read_file(link: &mut dyn Link, size: Option<usize>) -> Result<Vec<u8>> {
    let mut contents = Vec::with_capacity(size.unwrap_or(MAX_READ_CHUNK as usize));

    loop {
        let requested = match size {
            Some(size) if contents.len() >= size => break,
            Some(size) => (size - contents.len()).min(MAX_READ_CHUNK as usize) as u8,
            None => MAX_READ_CHUNK,
        };
        let offset = u16::try_from(contents.len())
            .ok()
            .filter(|offset| *offset <= 0x7FFF)
            .ok_or(Error::InvalidData("file exceeds READ BINARY offset range"))?;

        let response = link.transmit(&read_binary(offset, requested))?;
        let status = response.status();
        if !status.is_success() && !status.is_end_of_file() {
            return Err(Error::status(status));
        }

        let chunk = response.data();
        contents.extend_from_slice(chunk);
        trace!(offset, len = chunk.len(), %status, "Read file chunk");

        if !status.is_success() || chunk.len() < requested as usize {
            break;
        }
    }

    Ok(contents)
}

fn parse_tlv(data: &[u8]) -> Option<Tlv> {
    Tlv::parse(data).0.ok()
}

/// Depth-first search for the first object with tag bytes `tag`
fn find_tlv<'a>(tlv: &'a Tlv, tag: &[u8]) -> Option<&'a Tlv> {
    if tlv.tag().to_bytes() == tag {
        return Some(tlv);
    }
    match tlv.value() {
        Value::Constructed(children) => children.iter().find_map(|child| find_tlv(child, tag)),
        Value::Primitive(_) => None,
    }
}

fn primitive<'a>(tlv: &'a Tlv, tag: &[u8]) -> Option<&'a [u8]> {
    match find_tlv(tlv, tag)?.value() {
        Value::Primitive(bytes) => Some(bytes),
        Value::Constructed(_) => None,
    }
}

/// File size from tag `80` or `81` of an FCP template
fn fcp_size(fcp: &[u8]) -> Option<usize> {
    let fcp = parse_tlv(fcp)?;
    [[0x80], [0x81]].iter().find_map(|tag| match primitive(&fcp, tag)? {
        [hi, lo, ..] => Some(usize::from(u16::from_be_bytes([*hi, *lo]))),
        _ => None,
    })
}
