//! IDEMIA ID1 dialect

use eidcard_apdu_core::{Command, Response};
use tracing::debug;

use super::{CardKind, CardProfile, fcp_size, read_file, read_records};
use crate::channel::Link;
use crate::commands::read::{get_data, read_binary};
use crate::commands::security::{
    CRT_AUTHENTICATION, CRT_CONFIDENTIALITY, CRT_SIGNATURE, MSE_SET_COMPUTE, compute_signature,
    decipher, internal_authenticate, mse_set,
};
use crate::commands::pin;
use crate::commands::select::{
    self, DF_UNDER_CURRENT_DF, EF_UNDER_CURRENT_DF, NO_RESPONSE_DATA, PATH_FROM_CURRENT_DF,
    RETURN_FCP,
};
use crate::error::{Error, Result};
use crate::types::{CertificateType, CodeType};

const MAIN_AID: [u8; 16] = [
    0xA0, 0x00, 0x00, 0x00, 0x77, 0x01, 0x08, 0x00, 0x07, 0x00, 0x00, 0xFE, 0x00, 0x00, 0x01, 0x00,
];
const AWP_AID: [u8; 13] = [
    0xE8, 0x28, 0xBD, 0x08, 0x0F, 0xF2, 0x50, 0x4F, 0x54, 0x20, 0x41, 0x57, 0x50,
];
const QSCD_AID: &[u8] = b"QSCD Application";

const PERSONAL_DATA_DF: [u8; 2] = [0x50, 0x00];
const AUTHENTICATION_CERTIFICATE: [u8; 4] = [0xAD, 0xF1, 0x34, 0x01];
const SIGNING_CERTIFICATE: [u8; 4] = [0xAD, 0xF2, 0x34, 0x1F];

/// Security environment bodies: algorithm reference `80` and key reference `84`
const AUTHENTICATION_ENVIRONMENT: [u8; 9] = [0x80, 0x04, 0xFF, 0x20, 0x08, 0x00, 0x84, 0x01, 0x81];
const SIGNING_ENVIRONMENT: [u8; 9] = [0x80, 0x04, 0xFF, 0x15, 0x08, 0x00, 0x84, 0x01, 0x9F];
const DECIPHER_ENVIRONMENT: [u8; 9] = [0x80, 0x04, 0xFF, 0x30, 0x04, 0x00, 0x84, 0x01, 0x81];

/// Position of the remaining attempts in the GET DATA answer
const RETRY_COUNTER_OFFSET: usize = 13;

/// RESET RETRY COUNTER with only the new code in the data field
const RESET_NEW_CODE_ONLY: u8 = 0x02;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Id1;

impl Id1 {
    const fn reference(code: CodeType) -> u8 {
        match code {
            CodeType::Pin1 => 0x01,
            CodeType::Pin2 => 0x85,
            CodeType::Puk => 0x02,
        }
    }

    fn select_main(link: &mut dyn Link) -> Result<()> {
        link.send(&select::by_aid(&MAIN_AID, NO_RESPONSE_DATA))?;
        Ok(())
    }

    fn select_application(link: &mut dyn Link, aid: &[u8]) -> Result<()> {
        Self::select_main(link)?;
        link.send(&select::by_aid(aid, NO_RESPONSE_DATA))?;
        Ok(())
    }

    /// PIN2 lives in the signing application, the other codes in the main one
    fn select_for_code(link: &mut dyn Link, code: CodeType) -> Result<()> {
        match code {
            CodeType::Pin2 => Self::select_application(link, QSCD_AID),
            CodeType::Pin1 | CodeType::Puk => Self::select_main(link),
        }
    }

    fn verify(link: &mut dyn Link, code: CodeType, padded: &[u8]) -> Result<()> {
        let response = link.transmit(&pin::verify(Self::reference(code), padded))?;
        expect_code_accepted(code, &response)
    }

    fn compute(
        link: &mut dyn Link,
        template: u8,
        environment: &[u8],
        operation: &Command,
    ) -> Result<Vec<u8>> {
        link.send(&mse_set(MSE_SET_COMPUTE, template, environment))?;
        Ok(link.send(operation)?.to_vec())
    }
}

impl CardProfile for Id1 {
    fn kind(&self) -> CardKind {
        CardKind::Id1
    }

    fn code_filler(&self) -> u8 {
        0xFF
    }

    fn pace_preamble(&self) -> Option<Command> {
        Some(select::by_aid(&MAIN_AID, NO_RESPONSE_DATA))
    }

    fn personal_records(&self, link: &mut dyn Link) -> Result<Vec<String>> {
        Self::select_main(link)?;
        link.send(&select::file(DF_UNDER_CURRENT_DF, NO_RESPONSE_DATA, &PERSONAL_DATA_DF))?;

        read_records(link, |link, record| {
            link.send(&select::file(EF_UNDER_CURRENT_DF, NO_RESPONSE_DATA, &record))?;
            let response = link.transmit(&read_binary(0, 0))?;
            let status = response.status();
            if status.is_success() || status.is_end_of_file() {
                Ok(response.data().to_vec())
            } else {
                Err(Error::status(status))
            }
        })
    }

    fn certificate(&self, link: &mut dyn Link, kind: CertificateType) -> Result<Vec<u8>> {
        let path = match kind {
            CertificateType::Authentication => AUTHENTICATION_CERTIFICATE,
            CertificateType::Signing => SIGNING_CERTIFICATE,
        };

        Self::select_main(link)?;
        let fcp = link.send(&select::file(PATH_FROM_CURRENT_DF, RETURN_FCP, &path))?;
        let size = fcp_size(&fcp);
        debug!(%kind, ?size, "Reading certificate");
        read_file(link, size)
    }

    fn code_retry_counter(&self, link: &mut dyn Link, code: CodeType) -> Result<u8> {
        Self::select_main(link)?;
        let query = [
            0x4D,
            0x08,
            0x70,
            0x06,
            0xBF,
            0x81,
            Self::reference(code) & 0x0F,
            0x02,
            0xA0,
            0x80,
        ];
        let answer = link.send(&get_data(0x3F, 0xFF, &query))?;
        answer
            .get(RETRY_COUNTER_OFFSET)
            .copied()
            .ok_or(Error::InvalidData("retry counter answer too short"))
    }

    fn authenticate(&self, link: &mut dyn Link, pin1: &[u8], hash: &[u8]) -> Result<Vec<u8>> {
        let pin1 = self.pad(CodeType::Pin1, pin1)?;
        Self::select_application(link, &AWP_AID)?;
        Self::verify(link, CodeType::Pin1, &pin1)?;
        Self::compute(
            link,
            CRT_AUTHENTICATION,
            &AUTHENTICATION_ENVIRONMENT,
            &internal_authenticate(hash),
        )
    }

    fn calculate_signature(
        &self,
        link: &mut dyn Link,
        pin2: &[u8],
        hash: &[u8],
    ) -> Result<Vec<u8>> {
        let pin2 = self.pad(CodeType::Pin2, pin2)?;
        Self::select_application(link, QSCD_AID)?;
        Self::verify(link, CodeType::Pin2, &pin2)?;
        Self::compute(link, CRT_SIGNATURE, &SIGNING_ENVIRONMENT, &compute_signature(hash))
    }

    fn decrypt(&self, link: &mut dyn Link, pin1: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let pin1 = self.pad(CodeType::Pin1, pin1)?;
        Self::select_application(link, &AWP_AID)?;
        Self::verify(link, CodeType::Pin1, &pin1)?;
        Self::compute(link, CRT_CONFIDENTIALITY, &DECIPHER_ENVIRONMENT, &decipher(data))
    }

    fn change_code(
        &self,
        link: &mut dyn Link,
        code: CodeType,
        current: &[u8],
        new: &[u8],
    ) -> Result<()> {
        let current = self.pad(code, current)?;
        let new = self.pad(code, new)?;
        Self::select_for_code(link, code)?;
        let response = link.transmit(&pin::change_reference_data(
            Self::reference(code),
            &current,
            &new,
        ))?;
        expect_code_accepted(code, &response)
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
        Self::verify(link, CodeType::Puk, &puk)?;
        if code == CodeType::Pin2 {
            link.send(&select::by_aid(QSCD_AID, NO_RESPONSE_DATA))?;
        }
        link.send(&pin::reset_retry_counter(
            RESET_NEW_CODE_ONLY,
            Self::reference(code),
            new.to_vec(),
        ))?;
        Ok(())
    }
}

/// `63 Cx` carries the remaining attempts, `69 83` means the code is blocked
fn expect_code_accepted(code: CodeType, response: &Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    match status.counter() {
        Some(retries_left) => Err(Error::CodeVerification { code, retries_left }),
        None if status.is_blocked() => Err(Error::CodeVerification {
            code,
            retries_left: 0,
        }),
        None => Err(Error::status(status)),
    }
}
