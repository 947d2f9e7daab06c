use eidcard_apdu_core::Command;

use super::{CLA_ISO, ins};

/// VERIFY a padded code against reference `reference`
pub(crate) fn verify(reference: u8, code: &[u8]) -> Command {
    Command::new_with_data(CLA_ISO, ins::VERIFY, 0x00, reference, code.to_vec())
}

/// CHANGE REFERENCE DATA with `current || new`
pub(crate) fn change_reference_data(reference: u8, current: &[u8], new: &[u8]) -> Command {
    let mut data = Vec::with_capacity(current.len() + new.len());
    data.extend_from_slice(current);
    data.extend_from_slice(new);
    Command::new_with_data(CLA_ISO, ins::CHANGE_REFERENCE_DATA, 0x00, reference, data)
}

/// RESET RETRY COUNTER; `p1` selects whether the data carries the unblocking code
pub(crate) fn reset_retry_counter(p1: u8, reference: u8, data: Vec<u8>) -> Command {
    Command::new_with_data(CLA_ISO, ins::RESET_RETRY_COUNTER, p1, reference, data)
}
