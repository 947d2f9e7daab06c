//! BER-TLV data objects of the PACE and secure messaging frames

use iso7816_tlv::TlvError;
use iso7816_tlv::ber::{Tag, Tlv, Value};
use tracing::warn;

use crate::error::{Error, Result};

/// Primitive object with a one byte tag
pub(crate) fn primitive(tag: u8, value: &[u8]) -> Result<Tlv> {
    Tag::try_from(tag)
        .and_then(|tag| Tlv::new(tag, Value::Primitive(value.to_vec())))
        .map_err(encoding)
}

/// Constructed object; `tag` may span several bytes (`7F49`)
pub(crate) fn constructed(tag: &[u8], children: Vec<Tlv>) -> Result<Tlv> {
    tag.iter()
        .try_fold(0u64, |acc, &byte| acc.checked_mul(0x100).map(|acc| acc | u64::from(byte)))
        .ok_or(TlvError::InvalidInput)
        .and_then(Tag::try_from)
        .and_then(|tag| Tlv::new(tag, Value::Constructed(children)))
        .map_err(encoding)
}

fn encoding(error: TlvError) -> Error {
    warn!(?error, "Could not encode data object");
    Error::InvalidInput("data object encoding")
}

pub(crate) fn has_tag(tlv: &Tlv, tag: u8) -> bool {
    tlv.tag().to_bytes() == [tag].as_slice()
}

/// Value of a primitive object
pub(crate) fn value(tlv: &Tlv) -> Option<&[u8]> {
    match tlv.value() {
        Value::Primitive(bytes) => Some(bytes.as_slice()),
        Value::Constructed(_) => None,
    }
}

/// Split `data` into consecutive objects, each paired with the offset it starts at
///
/// `None` when any object is malformed or truncated.
pub(crate) fn parse_sequence(data: &[u8]) -> Option<Vec<(usize, Tlv)>> {
    let mut objects = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let offset = data.len() - rest.len();
        let (tlv, remaining) = Tlv::parse(rest);
        objects.push((offset, tlv.ok()?));
        rest = remaining;
    }
    Some(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_forms() {
        assert_eq!(primitive(0x8E, &[0xAA; 8]).unwrap().to_vec()[..2], [0x8E, 0x08]);
        assert_eq!(primitive(0x87, &[0; 0x90]).unwrap().to_vec()[..3], [0x87, 0x81, 0x90]);
        assert_eq!(
            primitive(0x87, &[0; 0x123]).unwrap().to_vec()[..4],
            [0x87, 0x82, 0x01, 0x23]
        );
    }

    #[test]
    fn test_two_byte_constructed_tag() {
        let key = constructed(&[0x7F, 0x49], vec![primitive(0x86, &[0x04]).unwrap()]).unwrap();
        assert_eq!(key.to_vec(), [0x7F, 0x49, 0x03, 0x86, 0x01, 0x04]);
    }

    #[test]
    fn test_parse_sequence_offsets() {
        let data = [0x99, 0x02, 0x90, 0x00, 0x8E, 0x08, 1, 2, 3, 4, 5, 6, 7, 8];
        let objects = parse_sequence(&data).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].0, 4);
        assert!(has_tag(&objects[1].1, 0x8E));
        assert_eq!(value(&objects[0].1), Some([0x90, 0x00].as_slice()));

        assert!(parse_sequence(&data[..10]).is_none());
        assert!(parse_sequence(&[]).unwrap().is_empty());
    }
}
