//! APDU command definitions and traits
//!
//! This module provides types and traits for working with APDU commands
//! according to ISO/IEC 7816-4. Only short length fields are produced; longer
//! payloads are split by the caller using command chaining.

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

/// Expected length type for APDU commands (`0x00` requests up to 256 bytes)
pub type ExpectedLength = u8;

/// Largest data field a short APDU can carry
pub const MAX_SHORT_DATA: usize = 255;

/// Bit set in CLA on every command of a chain except the last one
pub const CLA_CHAINING: u8 = 0x10;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with expected response length (Le)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: Some(le),
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Some(data.into()),
            le: None,
        }
    }

    /// Create a new command with both data and expected length
    pub fn new_with_data_and_le<T: Into<Bytes>>(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: T,
        le: ExpectedLength,
    ) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Some(data.into()),
            le: Some(le),
        }
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Data field, empty when absent
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Header bytes `CLA INS P1 P2`
    pub const fn header(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    /// Split a command whose data field exceeds `chunk` bytes into a command chain.
    ///
    /// Every link except the last carries the chaining bit in CLA and no Le.
    /// Commands that fit are returned unchanged as a single-element chain.
    pub fn chain(&self, chunk: usize) -> Vec<Self> {
        let data = self.payload();
        if chunk == 0 || data.len() <= chunk {
            return vec![self.clone()];
        }

        let mut links: Vec<Self> = data
            .chunks(chunk)
            .map(|part| Self {
                cla: self.cla | CLA_CHAINING,
                ins: self.ins,
                p1: self.p1,
                p2: self.p2,
                data: Some(Bytes::copy_from_slice(part)),
                le: None,
            })
            .collect();

        if let Some(last) = links.last_mut() {
            last.cla = self.cla;
            last.le = self.le;
        }

        links
    }

    /// Serialize to short APDU bytes; an empty data field is left out entirely
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());
        buffer.put_slice(&self.header());

        let data = self.payload();
        if !data.is_empty() {
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            buffer.put_u8(le);
        }

        buffer.freeze()
    }

    /// Length of [`Self::to_bytes`]
    pub fn command_length(&self) -> usize {
        let data = match self.payload().len() {
            0 => 0,
            len => 1 + len,
        };
        4 + data + usize::from(self.le.is_some())
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 4 {
            return Err(Error::InvalidCommandLength(data.len()));
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);

        if data.len() > 4 {
            let lc = data[4] as usize;

            if data.len() == 5 {
                // Only Le present, no data
                command.le = Some(data[4]);
            } else if data.len() >= 5 + lc {
                if lc > 0 {
                    command.data = Some(Bytes::copy_from_slice(&data[5..5 + lc]));
                }

                match data.len() - (5 + lc) {
                    0 => {}
                    1 => command.le = Some(data[5 + lc]),
                    _ => return Err(Error::InvalidCommandLength(data.len())),
                }
            } else {
                return Err(Error::InvalidCommandLength(data.len()));
            }
        }

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let aid = hex::decode("e828bd080ff2504f5420415750").unwrap();
        let cmd = Command::new_with_data(0x00, 0xA4, 0x04, 0x0C, aid);
        assert_eq!(
            hex::encode(cmd.to_bytes()),
            "00a4040c0de828bd080ff2504f5420415750"
        );

        let cmd = Command::new_with_data_and_le(0x10, 0x86, 0x00, 0x00, vec![0x7C, 0x00], 0x00);
        assert_eq!(hex::encode(cmd.to_bytes()), "10860000027c0000");
    }

    #[test]
    fn test_empty_data_is_omitted() {
        let cmd = Command::new_with_data_and_le(0x00, 0xB0, 0x00, 0x00, Bytes::new(), 0x00);
        assert_eq!(cmd.to_bytes().as_ref(), &[0x00, 0xB0, 0x00, 0x00, 0x00]);
        assert_eq!(cmd.command_length(), 5);
    }

    #[test]
    fn test_command_length() {
        let cmd1 = Command::new(0x00, 0xB0, 0x00, 0x00);
        assert_eq!(cmd1.command_length(), 4);

        let cmd2 = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 0xFF);
        assert_eq!(cmd2.command_length(), 5);

        let data = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let cmd3 = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, data.clone());
        assert_eq!(cmd3.command_length(), 8);

        let cmd4 = Command::new_with_data_and_le(0x00, 0xD6, 0x00, 0x00, data, 0xFF);
        assert_eq!(cmd4.command_length(), 9);
    }

    #[test]
    fn test_command_from_bytes() {
        let cmd = Command::from_bytes(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
        assert_eq!(cmd, Command::new(0x00, 0xA4, 0x04, 0x00));

        let cmd = Command::from_bytes(&[0x00, 0xA4, 0x04, 0x00, 0x03, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(cmd.payload(), &[0x01, 0x02, 0x03]);
        assert!(cmd.le.is_none());

        let cmd =
            Command::from_bytes(&[0x00, 0xA4, 0x04, 0x00, 0x03, 0x01, 0x02, 0x03, 0xFF]).unwrap();
        assert_eq!(cmd.payload(), &[0x01, 0x02, 0x03]);
        assert_eq!(cmd.le, Some(0xFF));

        let cmd = Command::from_bytes(&[0x00, 0xB0, 0x00, 0x00, 0x00]).unwrap();
        assert!(cmd.data.is_none());
        assert_eq!(cmd.le, Some(0x00));

        assert!(Command::from_bytes(&[0x00, 0xA4, 0x04]).is_err());
        assert!(Command::from_bytes(&[0x00, 0xA4, 0x04, 0x00, 0x05, 0x01]).is_err());
        assert!(Command::from_bytes(&[0x00, 0xA4, 0x04, 0x00, 0x01, 0x01, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_chain_splits_long_payloads() {
        let data = vec![0xAB; 600];
        let cmd = Command::new_with_data_and_le(0x00, 0x2A, 0x9E, 0x9A, data, 0x00);
        let links = cmd.chain(MAX_SHORT_DATA);

        assert_eq!(links.len(), 3);
        assert_eq!(links[0].cla, 0x10);
        assert_eq!(links[0].payload().len(), 255);
        assert!(links[0].le.is_none());
        assert_eq!(links[1].cla, 0x10);
        assert_eq!(links[2].cla, 0x00);
        assert_eq!(links[2].payload().len(), 90);
        assert_eq!(links[2].le, Some(0x00));
    }

    #[test]
    fn test_chain_keeps_short_commands() {
        let cmd = Command::new_with_data(0x00, 0x20, 0x00, 0x01, vec![0x31; 12]);
        assert_eq!(cmd.chain(MAX_SHORT_DATA), vec![cmd]);
    }
}
