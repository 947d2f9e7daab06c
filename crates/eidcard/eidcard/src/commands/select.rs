use eidcard_apdu_core::Command;

use super::{CLA_ISO, ins};

/// P1: select by DF name (AID)
pub(crate) const BY_NAME: u8 = 0x04;
/// P1: select EF under the current DF
pub(crate) const EF_UNDER_CURRENT_DF: u8 = 0x02;
/// P1: select DF under the current DF
pub(crate) const DF_UNDER_CURRENT_DF: u8 = 0x01;
/// P1: select by path from the MF
pub(crate) const PATH_FROM_MF: u8 = 0x08;
/// P1: select by path from the current DF
pub(crate) const PATH_FROM_CURRENT_DF: u8 = 0x09;

/// P2: first occurrence, no response data
pub(crate) const NO_RESPONSE_DATA: u8 = 0x0C;
/// P2: first occurrence, return FCP template
pub(crate) const RETURN_FCP: u8 = 0x04;
/// P2: first occurrence, return FCI
pub(crate) const RETURN_FCI: u8 = 0x00;

/// SELECT by application identifier
pub(crate) fn by_aid(aid: &[u8], p2: u8) -> Command {
    Command::new_with_data(CLA_ISO, ins::SELECT, BY_NAME, p2, aid.to_vec())
}

/// SELECT a file by identifier or path
///
/// No Le is sent even when `p2` asks for the FCP; the documents answer with it
/// regardless.
pub(crate) fn file(p1: u8, p2: u8, id: &[u8]) -> Command {
    Command::new_with_data(CLA_ISO, ins::SELECT, p1, p2, id.to_vec())
}
