//! Status word definitions for APDU responses

use std::fmt;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Status bytes in wire order
    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Get the number of remaining bytes when SW1 = 61
    pub const fn remaining_bytes(&self) -> Option<u8> {
        if self.sw1 == 0x61 {
            Some(self.sw2)
        } else {
            None
        }
    }

    /// Retry counter carried by a failed verification (63 CX)
    pub const fn counter(&self) -> Option<u8> {
        if self.sw1 == 0x63 && (self.sw2 & 0xF0) == 0xC0 {
            Some(self.sw2 & 0x0F)
        } else {
            None
        }
    }

    /// Check if this status word indicates a blocked authentication method (69 83)
    pub const fn is_blocked(&self) -> bool {
        self.sw1 == 0x69 && self.sw2 == 0x83
    }

    /// Check if the card reports reading past the end of a file (62 82 or 6B 00)
    pub const fn is_end_of_file(&self) -> bool {
        (self.sw1 == 0x62 && self.sw2 == 0x82) || (self.sw1 == 0x6B && self.sw2 == 0x00)
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, 0x82) => "End of file reached before reading Le bytes",
            (0x62, 0x83) => "Selected file invalidated",
            (0x63, 0x00) => "Authentication failed",
            (0x63, n) if (n & 0xF0) == 0xC0 => "Verification failed, counter value",
            (0x64, 0x00) => "State of non-volatile memory unchanged",
            (0x65, 0x81) => "Memory failure",
            (0x67, 0x00) => "Wrong length",
            (0x68, 0x82) => "Secure messaging not supported",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x83) => "Authentication method blocked",
            (0x69, 0x84) => "Referenced data invalidated",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x69, 0x87) => "Expected SM data objects missing",
            (0x69, 0x88) => "SM data objects incorrect",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x81) => "Function not supported",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6A, 0x88) => "Referenced data not found",
            (0x6B, 0x00) => "Wrong parameters P1-P2",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from((sw1, sw2): (u8, u8)) -> Self {
        Self::new(sw1, sw2)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

/// Common status words
pub mod common {
    use super::StatusWord;

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);
    /// Authentication failed without counter information (63 00)
    pub const AUTHENTICATION_FAILED: StatusWord = StatusWord::new(0x63, 0x00);
    /// Authentication method blocked (69 83)
    pub const AUTHENTICATION_METHOD_BLOCKED: StatusWord = StatusWord::new(0x69, 0x83);
    /// SM data objects incorrect (69 88)
    pub const SM_DATA_INCORRECT: StatusWord = StatusWord::new(0x69, 0x88);
    /// File not found (6A 82)
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_conversions() {
        let sw = StatusWord::from_u16(0x63C2);
        assert_eq!(sw, StatusWord::new(0x63, 0xC2));
        assert_eq!(sw.to_u16(), 0x63C2);
        assert_eq!(sw.to_bytes(), [0x63, 0xC2]);
        assert_eq!(sw.to_string(), "63 C2");
    }

    #[test]
    fn test_counter() {
        assert_eq!(StatusWord::new(0x63, 0xC2).counter(), Some(2));
        assert_eq!(StatusWord::new(0x63, 0xC0).counter(), Some(0));
        assert_eq!(StatusWord::new(0x63, 0x00).counter(), None);
        assert_eq!(common::SUCCESS.counter(), None);
        assert!(common::AUTHENTICATION_METHOD_BLOCKED.is_blocked());
    }

    #[test]
    fn test_more_data() {
        let sw = StatusWord::new(0x61, 0x10);
        assert_eq!(sw.remaining_bytes(), Some(0x10));
        assert_eq!(common::SUCCESS.remaining_bytes(), None);
    }

    #[test]
    fn test_end_of_file() {
        assert!(StatusWord::new(0x6B, 0x00).is_end_of_file());
        assert!(StatusWord::new(0x62, 0x82).is_end_of_file());
        assert!(!common::FILE_NOT_FOUND.is_end_of_file());
    }
}
