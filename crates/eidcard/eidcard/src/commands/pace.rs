//! Unprotected commands of the PACE handshake

use eidcard_apdu_core::Command;
use eidcard_apdu_core::command::CLA_CHAINING;
use iso7816_tlv::ber::Tlv;

use super::security::{CRT_AUTHENTICATION, MSE_SET_AUTHENTICATION, mse_set};
use super::{CLA_ISO, ins};
use crate::error::Result;
use crate::tlv;

/// id-PACE-ECDH-GM-AES-CBC-CMAC-256 (0.4.0.127.0.7.2.2.4.2.4)
pub(crate) const PACE_OID: [u8; 10] = [0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x04, 0x02, 0x04];

/// Password reference of the CAN
pub(crate) const PASSWORD_CAN: u8 = 0x02;

/// Standardized domain parameter 12, NIST P-256
pub(crate) const DOMAIN_PARAMETERS_P256: u8 = 0x0C;

/// Wrapper of every GENERAL AUTHENTICATE data field and answer
pub(crate) const DYNAMIC_AUTHENTICATION_DATA: u8 = 0x7C;

const TAG_MECHANISM: u8 = 0x80;
const TAG_PASSWORD: u8 = 0x83;
const TAG_DOMAIN_PARAMETERS: u8 = 0x84;

/// MSE: SET AT selecting PACE with the CAN
pub(crate) fn set_authentication_template() -> Result<Command> {
    let data: Vec<u8> = [
        tlv::primitive(TAG_MECHANISM, &PACE_OID)?,
        tlv::primitive(TAG_PASSWORD, &[PASSWORD_CAN])?,
        tlv::primitive(TAG_DOMAIN_PARAMETERS, &[DOMAIN_PARAMETERS_P256])?,
    ]
    .iter()
    .flat_map(Tlv::to_vec)
    .collect();
    Ok(mse_set(MSE_SET_AUTHENTICATION, CRT_AUTHENTICATION, &data).with_le(0x00))
}

/// GENERAL AUTHENTICATE carrying a dynamic authentication data object (`7C`)
///
/// All steps but the last are sent as part of a command chain. An empty
/// `value` sends the bare `7C 00` that asks for the encrypted nonce.
pub(crate) fn general_authenticate(tag: u8, value: &[u8], last: bool) -> Result<Command> {
    let children = if value.is_empty() {
        Vec::new()
    } else {
        vec![tlv::primitive(tag, value)?]
    };
    let data = tlv::constructed(&[DYNAMIC_AUTHENTICATION_DATA], children)?.to_vec();

    let cla = if last { CLA_ISO } else { CLA_ISO | CLA_CHAINING };
    Ok(Command::new_with_data_and_le(cla, ins::GENERAL_AUTHENTICATE, 0x00, 0x00, data, 0x00))
}
