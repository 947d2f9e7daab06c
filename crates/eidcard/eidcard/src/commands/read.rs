use eidcard_apdu_core::{Command, ExpectedLength};

use super::{CLA_ISO, ins};

/// Largest chunk requested per READ BINARY on profiles that size their reads
pub(crate) const MAX_READ_CHUNK: u8 = 0xE5;

/// READ BINARY at `offset` of the current EF (15-bit offset in P1-P2)
pub(crate) const fn read_binary(offset: u16, le: ExpectedLength) -> Command {
    let [p1, p2] = offset.to_be_bytes();
    Command::new_with_le(CLA_ISO, ins::READ_BINARY, p1 & 0x7F, p2, le)
}

/// GET RESPONSE for the `le` bytes announced by a `61xx` status
pub(crate) const fn get_response(le: ExpectedLength) -> Command {
    Command::new_with_le(CLA_ISO, ins::GET_RESPONSE, 0x00, 0x00, le)
}

/// GET DATA (odd INS variant taking a tag list in the data field)
pub(crate) fn get_data(p1: u8, p2: u8, data: &[u8]) -> Command {
    Command::new_with_data_and_le(CLA_ISO, ins::GET_DATA, p1, p2, data.to_vec(), 0x00)
}
