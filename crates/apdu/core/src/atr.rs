//! ISO/IEC 7816-3 _Answer-to-Reset_ parsing
//!
//! Only the parts needed to identify a document are decoded: the interface
//! bytes are walked to find where the historical bytes (T1 .. TK) start.
//! Contactless readers synthesize an ATR of the form `3B 8n 80 01 <historical> TCK`
//! from the ATS (PC/SC part 3, §3.1.3.2.3.1), so the same walk yields the ATS
//! historical bytes.

use thiserror::Error;

/// Errors while parsing an ATR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AtrError {
    /// Fewer than the TS and T0 bytes
    #[error("ATR too short")]
    TooShort,

    /// TS is neither direct (3B) nor inverse (3F) convention
    #[error("Invalid initial character {0:#04x}")]
    InvalidInitialCharacter(u8),

    /// Interface or historical bytes run past the end of the ATR
    #[error("ATR truncated")]
    Truncated,
}

/// Return the historical bytes of an ATR.
pub fn historical_bytes(atr: &[u8]) -> Result<&[u8], AtrError> {
    let [ts, t0, ..] = atr else {
        return Err(AtrError::TooShort);
    };
    if *ts != 0x3B && *ts != 0x3F {
        return Err(AtrError::InvalidInitialCharacter(*ts));
    }

    let k = (t0 & 0x0F) as usize;
    let mut indicator = t0 >> 4;
    let mut offset = 2;

    loop {
        // TA, TB, TC, TD presence bits
        let present = indicator.count_ones() as usize;
        offset += present;

        if indicator & 0x08 == 0 {
            break;
        }

        let td = *atr.get(offset - 1).ok_or(AtrError::Truncated)?;
        indicator = td >> 4;
    }

    atr.get(offset..offset + k).ok_or(AtrError::Truncated)
}
