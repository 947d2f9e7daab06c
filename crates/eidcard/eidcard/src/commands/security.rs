use eidcard_apdu_core::Command;

use super::{CLA_ISO, ins};
use crate::error::Result;
use crate::tlv;

/// P1 of MANAGE SECURITY ENVIRONMENT: SET for computation and decipherment
pub(crate) const MSE_SET_COMPUTE: u8 = 0x41;
/// P1 of MANAGE SECURITY ENVIRONMENT: SET for mutual authentication (PACE)
pub(crate) const MSE_SET_AUTHENTICATION: u8 = 0xC1;

/// Control reference template for authentication
pub(crate) const CRT_AUTHENTICATION: u8 = 0xA4;
/// Control reference template for digital signature
pub(crate) const CRT_SIGNATURE: u8 = 0xB6;
/// Control reference template for confidentiality
pub(crate) const CRT_CONFIDENTIALITY: u8 = 0xB8;

/// MANAGE SECURITY ENVIRONMENT: SET with a raw control reference template body
pub(crate) fn mse_set(p1: u8, template: u8, data: &[u8]) -> Command {
    Command::new_with_data(
        CLA_ISO,
        ins::MANAGE_SECURITY_ENVIRONMENT,
        p1,
        template,
        data.to_vec(),
    )
}

/// PSO: COMPUTE DIGITAL SIGNATURE over a hash sent in the same command
pub(crate) fn compute_signature(hash: &[u8]) -> Command {
    Command::new_with_data_and_le(
        CLA_ISO,
        ins::PERFORM_SECURITY_OPERATION,
        0x9E,
        0x9A,
        hash.to_vec(),
        0x00,
    )
}

/// PSO: COMPUTE DIGITAL SIGNATURE over a hash set earlier with [`hash`]
pub(crate) const fn compute_signature_of_stored_hash() -> Command {
    Command::new_with_le(CLA_ISO, ins::PERFORM_SECURITY_OPERATION, 0x9E, 0x9A, 0x00)
}

/// PSO: HASH, handing a precomputed hash to the card as DO90
pub(crate) fn hash(hash: &[u8]) -> Result<Command> {
    let data = tlv::primitive(0x90, hash)?.to_vec();
    Ok(Command::new_with_data(CLA_ISO, ins::PERFORM_SECURITY_OPERATION, 0x90, 0xA0, data))
}

/// PSO: DECIPHER with the padding indicator byte `00` in front of the cryptogram
pub(crate) fn decipher(cryptogram: &[u8]) -> Command {
    let mut data = Vec::with_capacity(cryptogram.len() + 1);
    data.push(0x00);
    data.extend_from_slice(cryptogram);
    Command::new_with_data_and_le(
        CLA_ISO,
        ins::PERFORM_SECURITY_OPERATION,
        0x80,
        0x86,
        data,
        0x00,
    )
}

/// INTERNAL AUTHENTICATE over a challenge hash
pub(crate) fn internal_authenticate(hash: &[u8]) -> Command {
    Command::new_with_data_and_le(
        CLA_ISO,
        ins::INTERNAL_AUTHENTICATE,
        0x00,
        0x00,
        hash.to_vec(),
        0x00,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_commands() {
        let cmd = mse_set(
            MSE_SET_COMPUTE,
            CRT_SIGNATURE,
            &[0x80, 0x04, 0xFF, 0x15, 0x08, 0x00, 0x84, 0x01, 0x9F],
        );
        assert_eq!(hex::encode(cmd.to_bytes()), "002241b6098004ff15080084019f");

        let cmd = hash(&[0xAB; 48]).unwrap();
        assert_eq!(&cmd.to_bytes()[..7], &[0x00, 0x2A, 0x90, 0xA0, 0x32, 0x90, 0x30]);

        assert_eq!(
            hex::encode(compute_signature_of_stored_hash().to_bytes()),
            "002a9e9a00"
        );
    }

    #[test]
    fn test_decipher_prefix() {
        let cmd = decipher(&[0x04; 97]);
        assert_eq!(cmd.payload().len(), 98);
        assert_eq!(cmd.payload()[0], 0x00);
        assert_eq!(cmd.le, Some(0x00));
    }
}
