//! Thales dialect
//!
//! Codes are zero padded, signing goes through PSO: HASH followed by PSO:
//! COMPUTE DIGITAL SIGNATURE, and files report their size in the FCP.

use eidcard_apdu_core::Command;
use eidcard_apdu_core::response::status::common::AUTHENTICATION_METHOD_BLOCKED;
use tracing::debug;

use super::{CardKind, CardProfile, fcp_size, parse_tlv, primitive, read_file, read_records};
use crate::channel::Link;
use crate::commands::pin;
use crate::commands::read::{MAX_READ_CHUNK, get_data};
use crate::commands::security::{
    CRT_CONFIDENTIALITY, CRT_SIGNATURE, MSE_SET_COMPUTE, compute_signature_of_stored_hash,
    decipher, hash, mse_set,
};
use crate::commands::select::{
    self, EF_UNDER_CURRENT_DF, NO_RESPONSE_DATA, PATH_FROM_MF, RETURN_FCI, RETURN_FCP,
};
use crate::error::{Error, Result};
use crate::types::{CertificateType, CodeType};

/// PKCS#15 application
const MAIN_AID: [u8; 12] = [
    0xA0, 0x00, 0x00, 0x00, 0x63, 0x50, 0x4B, 0x43, 0x53, 0x2D, 0x31, 0x35,
];

const PERSONAL_DATA_DF: [u8; 2] = [0xDF, 0xDD];
const AUTHENTICATION_CERTIFICATE: [u8; 4] = [0xAD, 0xF1, 0x34, 0x11];
const SIGNING_CERTIFICATE: [u8; 4] = [0xAD, 0xF2, 0x34, 0x21];

const AUTHENTICATION_KEY: u8 = 0x01;
const SIGNING_KEY: u8 = 0x05;

/// Algorithm reference is this plus the hash length
const ALGORITHM_BASE: u8 = 0x24;

const TAG_RETRY_TEMPLATE: [u8; 1] = [0xA0];
const TAG_RETRY_COUNTER: [u8; 2] = [0xDF, 0x21];

/// RESET RETRY COUNTER with the unblocking code in front of the new one
const RESET_WITH_UNBLOCKING_CODE: u8 = 0x00;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Thales;

impl Thales {
    const fn reference(code: CodeType) -> u8 {
        match code {
            CodeType::Pin1 => 0x81,
            CodeType::Pin2 => 0x82,
            CodeType::Puk => 0x83,
        }
    }

    fn select_main(link: &mut dyn Link) -> Result<()> {
        link.send(&select::by_aid(&MAIN_AID, RETURN_FCI))?;
        Ok(())
    }

    /// Select an EF and read it whole, sized from its FCP
    fn read_sized(link: &mut dyn Link, p1: u8, id: &[u8]) -> Result<Vec<u8>> {
        let fcp = link.send(&select::file(p1, RETURN_FCP, id))?;
        let size = fcp_size(&fcp).unwrap_or(usize::from(MAX_READ_CHUNK));
        read_file(link, Some(size))
    }

    fn verify(link: &mut dyn Link, code: CodeType, padded: &[u8]) -> Result<()> {
        let response = link.transmit(&pin::verify(Self::reference(code), padded))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.sw1 == 0x63 || status == AUTHENTICATION_METHOD_BLOCKED {
            let retries_left = match status.sw2 {
                0xC2 => 2,
                0xC1 => 1,
                _ => 0,
            };
            return Err(Error::CodeVerification { code, retries_left });
        }
        Err(Error::status(status))
    }

    fn sign(
        &self,
        link: &mut dyn Link,
        code: CodeType,
        value: &[u8],
        key: u8,
        digest: &[u8],
    ) -> Result<Vec<u8>> {
        let value = self.pad(code, value)?;
        let algorithm = u8::try_from(digest.len())
            .ok()
            .and_then(|len| ALGORITHM_BASE.checked_add(len))
            .ok_or(Error::InvalidInput("hash too long"))?;

        Self::select_main(link)?;
        Self::verify(link, code, &value)?;
        link.send(&mse_set(
            MSE_SET_COMPUTE,
            CRT_SIGNATURE,
            &[0x80, 0x01, algorithm, 0x84, 0x01, key],
        ))?;
        link.send(&hash(digest)?)?;
        Ok(link.send(&compute_signature_of_stored_hash())?.to_vec())
    }
}

impl CardProfile for Thales {
    fn kind(&self) -> CardKind {
        CardKind::Thales
    }

    fn code_filler(&self) -> u8 {
        0x00
    }

    fn pace_preamble(&self) -> Option<Command> {
        None
    }

    fn personal_records(&self, link: &mut dyn Link) -> Result<Vec<String>> {
        Self::select_main(link)?;
        link.send(&select::file(PATH_FROM_MF, NO_RESPONSE_DATA, &PERSONAL_DATA_DF))?;
        read_records(link, |link, record| {
            Self::read_sized(link, EF_UNDER_CURRENT_DF, &record)
        })
    }

    fn certificate(&self, link: &mut dyn Link, kind: CertificateType) -> Result<Vec<u8>> {
        let path = match kind {
            CertificateType::Authentication => AUTHENTICATION_CERTIFICATE,
            CertificateType::Signing => SIGNING_CERTIFICATE,
        };
        Self::select_main(link)?;
        debug!(%kind, "Reading certificate");
        Self::read_sized(link, PATH_FROM_MF, &path)
    }

    fn code_retry_counter(&self, link: &mut dyn Link, code: CodeType) -> Result<u8> {
        Self::select_main(link)?;
        let answer = link.send(&get_data(
            0x00,
            0xFF,
            &[0xA0, 0x03, 0x83, 0x01, Self::reference(code)],
        ))?;

        // Anything but an A0 template carrying DF21 reads as no attempts left
        let counter = parse_tlv(&answer)
            .filter(|tlv| tlv.tag().to_bytes() == TAG_RETRY_TEMPLATE.as_slice())
            .and_then(|tlv| primitive(&tlv, &TAG_RETRY_COUNTER)?.first().copied())
            .unwrap_or(0);
        Ok(counter)
    }

    fn authenticate(&self, link: &mut dyn Link, pin1: &[u8], hash: &[u8]) -> Result<Vec<u8>> {
        self.sign(link, CodeType::Pin1, pin1, AUTHENTICATION_KEY, hash)
    }

    fn calculate_signature(
        &self,
        link: &mut dyn Link,
        pin2: &[u8],
        hash: &[u8],
    ) -> Result<Vec<u8>> {
        self.sign(link, CodeType::Pin2, pin2, SIGNING_KEY, hash)
    }

    fn decrypt(&self, link: &mut dyn Link, pin1: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let pin1 = self.pad(CodeType::Pin1, pin1)?;
        Self::select_main(link)?;
        Self::verify(link, CodeType::Pin1, &pin1)?;
        link.send(&mse_set(
            MSE_SET_COMPUTE,
            CRT_CONFIDENTIALITY,
            &[0x84, 0x01, AUTHENTICATION_KEY],
        ))?;
        Ok(link.send(&decipher(data))?.to_vec())
    }

    fn change_code(
        &self,
        link: &mut dyn Link,
        code: CodeType,
        current: &[u8],
        new: &[u8],
    ) -> Result<()> {
        if code == CodeType::Puk {
            return Err(Error::InvalidInput("the PUK cannot be changed on this document"));
        }
        let current = self.pad(code, current)?;
        let new = self.pad(code, new)?;

        Self::select_main(link)?;
        Self::verify(link, code, &current)?;
        link.send(&pin::change_reference_data(
            Self::reference(code),
            &current,
            &new,
        ))?;
        Ok(())
    }

    fn unblock_code(
        &self,
        link: &mut dyn Link,
        puk: &[u8],
        code: CodeType,
        new: &[u8],
    ) -> Result<()> {
        if code == CodeType::Puk {
            return Err(Error::InvalidInput("the PUK cannot be unblocked"));
        }
        let puk = self.pad(CodeType::Puk, puk)?;
        let new = self.pad(code, new)?;

        Self::select_main(link)?;
        let mut data = Vec::with_capacity(puk.len() + new.len());
        data.extend_from_slice(&puk);
        data.extend_from_slice(&new);
        let response = link.transmit(&pin::reset_retry_counter(
            RESET_WITH_UNBLOCKING_CODE,
            Self::reference(code),
            data,
        ))?;

        // A wrong PUK is reported against the PUK counter
        let status = response.status();
        match status.counter() {
            _ if status.is_success() => Ok(()),
            Some(retries_left) => Err(Error::CodeVerification {
                code: CodeType::Puk,
                retries_left,
            }),
            None if status.is_blocked() => Err(Error::CodeVerification {
                code: CodeType::Puk,
                retries_left: 0,
            }),
            None => Err(Error::status(status)),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::super::tests::{Replies, data, ok};
    use super::*;

    #[test]
    fn test_verify_counter_mapping() {
        for (sw, expected) in [(0x63C2, 2), (0x63C1, 1), (0x63C3, 0), (0x6300, 0), (0x6983, 0)] {
            let mut link = Replies::new([ok(), data(&[], sw)]);
            let error = Thales
                .authenticate(&mut link, b"1234", &[0; 32])
                .unwrap_err();
            assert_eq!(error.retries_left(), Some(expected), "status {sw:04X}");
        }
    }

    #[test]
    fn test_signing_sequence() {
        let mut link = Replies::new([ok(), ok(), ok(), ok(), data(&[0x5A; 96], 0x9000)]);
        let signature = Thales
            .calculate_signature(&mut link, b"12345", &[0x11; 48])
            .unwrap();
        assert_eq!(signature.len(), 96);

        let sent: Vec<String> = link.sent.iter().map(|c| hex::encode(c.to_bytes())).collect();
        assert_eq!(sent[0], "00a404000ca000000063504b43532d3135");
        assert_eq!(sent[1], "002000820c313233343500000000000000");
        assert_eq!(sent[2], "002241b606800154840105");
        assert!(sent[3].starts_with("002a90a0329030"));
        assert_eq!(sent[4], "002a9e9a00");
    }

    #[test]
    fn test_authentication_uses_key_one() {
        let mut link = Replies::new([ok(), ok(), ok(), ok(), data(&[0x5A; 64], 0x9000)]);
        Thales.authenticate(&mut link, b"1234", &[0x11; 32]).unwrap();
        assert_eq!(link.sent[2].payload(), &[0x80, 0x01, 0x44, 0x84, 0x01, 0x01]);
    }

    #[test]
    fn test_retry_counter_template() {
        let answer = hex::decode("a007830181df210103").unwrap();
        let mut link = Replies::new([ok(), data(&answer, 0x9000)]);
        assert_eq!(Thales.code_retry_counter(&mut link, CodeType::Pin1).unwrap(), 3);
        assert_eq!(
            hex::encode(link.sent[1].to_bytes()),
            "00cb00ff05a00383018100"
        );

        let mut link = Replies::new([ok(), data(&[0x7F, 0x00], 0x9000)]);
        assert_eq!(Thales.code_retry_counter(&mut link, CodeType::Pin1).unwrap(), 0);
    }

    #[test]
    fn test_change_puk_rejected() {
        let mut link = Replies::new([]);
        assert!(matches!(
            Thales.change_code(&mut link, CodeType::Puk, b"12345678", b"87654321"),
            Err(Error::InvalidInput(_))
        ));
        assert!(link.sent.is_empty());
    }

    #[test]
    fn test_change_verifies_first() {
        let mut link = Replies::new([ok(), data(&[], 0x63C2)]);
        let error = Thales
            .change_code(&mut link, CodeType::Pin1, b"1234", b"5678")
            .unwrap_err();
        assert_eq!(error.retries_left(), Some(2));
        assert_eq!(link.sent.len(), 2);
    }

    #[test]
    fn test_unblock_data_layout() {
        let mut link = Replies::new([ok(), ok()]);
        Thales
            .unblock_code(&mut link, b"12345678", CodeType::Pin2, b"54321")
            .unwrap();
        let reset = &link.sent[1];
        assert_eq!(reset.header(), [0x00, 0x2C, 0x00, 0x82]);
        assert_eq!(reset.payload().len(), 24);
        assert_eq!(&reset.payload()[..8], b"12345678");
        assert_eq!(&reset.payload()[12..17], b"54321");
    }

    #[test]
    fn test_certificate_sized_from_fcp() {
        let fcp = hex::decode("6204800200f0").unwrap();
        let mut link = Replies::new([
            ok(),
            data(&fcp, 0x9000),
            data(&[1; 0xE5], 0x9000),
            data(&[2; 0x0B], 0x9000),
        ]);
        let der = Thales
            .certificate(&mut link, CertificateType::Signing)
            .unwrap();
        assert_eq!(der.len(), 0xF0);
        assert_eq!(
            hex::encode(link.sent[1].to_bytes()),
            "00a4080404adf23421"
        );
    }
}
