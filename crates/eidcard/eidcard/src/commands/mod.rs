//! ISO/IEC 7816-4 command builders used by the card profiles
//!
//! Every builder returns a plain [`Command`](eidcard_apdu_core::Command); whether
//! it travels in the clear or through secure messaging is decided by the link it
//! is sent over.

pub(crate) mod pace;
pub(crate) mod pin;
pub(crate) mod read;
pub(crate) mod security;
pub(crate) mod select;

/// Interindustry class byte
pub(crate) const CLA_ISO: u8 = 0x00;

/// Instruction bytes
pub(crate) mod ins {
    pub(crate) const VERIFY: u8 = 0x20;
    pub(crate) const MANAGE_SECURITY_ENVIRONMENT: u8 = 0x22;
    pub(crate) const CHANGE_REFERENCE_DATA: u8 = 0x24;
    pub(crate) const PERFORM_SECURITY_OPERATION: u8 = 0x2A;
    pub(crate) const RESET_RETRY_COUNTER: u8 = 0x2C;
    pub(crate) const GENERAL_AUTHENTICATE: u8 = 0x86;
    pub(crate) const INTERNAL_AUTHENTICATE: u8 = 0x88;
    pub(crate) const SELECT: u8 = 0xA4;
    pub(crate) const READ_BINARY: u8 = 0xB0;
    pub(crate) const GET_RESPONSE: u8 = 0xC0;
    pub(crate) const GET_DATA: u8 = 0xCB;
}
