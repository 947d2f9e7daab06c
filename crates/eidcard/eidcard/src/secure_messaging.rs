//! Secure messaging codec (ISO/IEC 7816-4 §10, AES variant of BSI TR-03110)
//!
//! Commands are protected as `CLA|0C INS P1 P2 Lc [DO85|DO87] [DO97] DO8E 00`,
//! responses carry `[DO87] [DO99] DO8E SW1 SW2`. Both sides advance the send
//! sequence counter once per command and once per response.

use std::fmt;

use bytes::Bytes;
use eidcard_apdu_core::{Command, MAX_SHORT_DATA, Response, StatusWord};
use iso7816_tlv::ber::Tlv;
use subtle::ConstantTimeEq;
use tracing::{debug, trace, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{
    BLOCK_SIZE, Block, MAC_LENGTH, SessionKey, cbc_decrypt, cbc_encrypt, cmac8, encrypt_block,
    pad, pad_unaligned,
};
use crate::error::{Error, IntegrityFailure, Result};
use crate::tlv;

/// CLA bits announcing a protected command with an authenticated header
pub const CLA_SECURE_MESSAGING: u8 = 0x0C;

/// Largest plain data field that still fits a protected short APDU
pub const MAX_PROTECTED_DATA: usize = 223;

const DO_ODD_CRYPTOGRAM: u8 = 0x85;
const DO_CRYPTOGRAM: u8 = 0x87;
const DO_EXPECTED_LENGTH: u8 = 0x97;
const DO_STATUS: u8 = 0x99;
const DO_MAC: u8 = 0x8E;
const CRYPTOGRAM_PADDED: u8 = 0x01;

/// Keys and send sequence counter of an established tunnel
///
/// The same type drives the card side of the protocol (see
/// [`SecureMessaging::unprotect_command`]), which keeps both directions in one
/// place and lets a simulated chip share the exact codec.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureMessaging {
    enc: SessionKey,
    mac: SessionKey,
    ssc: Block,
}

impl fmt::Debug for SecureMessaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureMessaging")
            .field("ssc", &hex_counter(&self.ssc))
            .finish_non_exhaustive()
    }
}

impl SecureMessaging {
    /// New channel with the counter at zero
    pub const fn new(enc: SessionKey, mac: SessionKey) -> Self {
        Self {
            enc,
            mac,
            ssc: [0; BLOCK_SIZE],
        }
    }

    /// Current send sequence counter
    pub const fn ssc(&self) -> &Block {
        &self.ssc
    }

    /// Replace the counter, e.g. to resynchronise a test peer
    pub const fn set_ssc(&mut self, ssc: Block) {
        self.ssc = ssc;
    }

    fn increment(&mut self) {
        increment_counter(&mut self.ssc);
    }

    /// Advance the counter for a response that carried no secure messaging objects
    pub(crate) fn skip_response(&mut self) {
        self.increment();
    }

    fn iv(&self) -> Block {
        encrypt_block(&self.enc, &self.ssc)
    }

    fn command_mac(&self, header: &[u8; 4], objects: &[u8]) -> [u8; MAC_LENGTH] {
        let mut input = Vec::with_capacity(2 * BLOCK_SIZE + objects.len() + BLOCK_SIZE);
        input.extend_from_slice(&self.ssc);
        input.extend_from_slice(header);
        pad(&mut input);
        input.extend_from_slice(objects);
        pad_unaligned(&mut input);
        cmac8(&self.mac, &input)
    }

    fn response_mac(&self, objects: &[u8]) -> [u8; MAC_LENGTH] {
        let mut input = Vec::with_capacity(BLOCK_SIZE + objects.len() + BLOCK_SIZE);
        input.extend_from_slice(&self.ssc);
        input.extend_from_slice(objects);
        pad(&mut input);
        cmac8(&self.mac, &input)
    }

    fn verify_mac(expected: &[u8; MAC_LENGTH], received: &[u8]) -> Result<()> {
        if bool::from(expected.as_slice().ct_eq(received)) {
            Ok(())
        } else {
            warn!("Secure messaging MAC mismatch");
            Err(IntegrityFailure::MacMismatch.into())
        }
    }

    /// Wrap a plain command for transmission over the tunnel
    pub fn protect(&mut self, command: &Command) -> Result<Command> {
        let data = command.payload();
        if data.len() > MAX_PROTECTED_DATA {
            return Err(Error::InvalidInput("command data too long for one protected frame"));
        }

        self.increment();
        let header = [
            command.cla | CLA_SECURE_MESSAGING,
            command.ins,
            command.p1,
            command.p2,
        ];

        let mut objects = Vec::with_capacity(MAX_SHORT_DATA);
        if !data.is_empty() {
            let cryptogram = cbc_encrypt(&self.enc, &self.iv(), data);
            let object = if command.ins % 2 == 0 {
                cryptogram_object(&cryptogram)?
            } else {
                tlv::primitive(DO_ODD_CRYPTOGRAM, &cryptogram)?
            };
            objects.extend_from_slice(&object.to_vec());
        }
        if let Some(le) = command.le {
            objects.extend_from_slice(&tlv::primitive(DO_EXPECTED_LENGTH, &[le])?.to_vec());
        }

        let mac = self.command_mac(&header, &objects);
        objects.extend_from_slice(&tlv::primitive(DO_MAC, &mac)?.to_vec());

        debug!(
            ins = format_args!("{:02X}", command.ins),
            plain_len = data.len(),
            "Protected command"
        );

        let [cla, ins, p1, p2] = header;
        Ok(Command::new_with_data_and_le(cla, ins, p1, p2, objects, 0x00))
    }

    /// Verify and decrypt a protected response (data objects followed by SW1 SW2)
    pub fn unprotect(&mut self, raw: &[u8]) -> Result<Response> {
        self.increment();
        trace!(len = raw.len(), "Unprotecting response");

        let (body, sw) = raw
            .split_last_chunk::<2>()
            .ok_or(IntegrityFailure::Malformed("response shorter than a status word"))?;
        let status = StatusWord::new(sw[0], sw[1]);

        let frame = Frame::parse(body, DO_STATUS)?;
        let protected_status = match frame.trailer.as_deref() {
            Some([sw1, sw2]) => Some(StatusWord::new(*sw1, *sw2)),
            Some(_) => return Err(IntegrityFailure::Malformed("status object length").into()),
            None => None,
        };
        if frame.mac.len() != MAC_LENGTH {
            return Err(IntegrityFailure::Malformed("MAC length").into());
        }

        Self::verify_mac(&self.response_mac(&body[..frame.mac_start]), &frame.mac)?;

        if protected_status.is_some_and(|protected| protected != status) {
            warn!(%status, "Protected status differs from status word");
            return Err(IntegrityFailure::StatusMismatch.into());
        }

        let data = match &frame.cryptogram {
            Some(cryptogram) => self.decrypt(cryptogram)?,
            None => Vec::new(),
        };
        debug!(%status, data_len = data.len(), "Unprotected response");

        Ok(Response::new(Some(Bytes::from(data)), status))
    }

    fn decrypt(&self, cryptogram: &[u8]) -> Result<Vec<u8>> {
        if cryptogram.is_empty() || cryptogram.len() % BLOCK_SIZE != 0 {
            return Err(IntegrityFailure::Malformed("cryptogram length").into());
        }
        cbc_decrypt(&self.enc, &self.iv(), cryptogram).map_err(|_| IntegrityFailure::Padding.into())
    }

    /// Card side: verify and decrypt a protected command
    pub fn unprotect_command(&mut self, raw: &[u8]) -> Result<Command> {
        self.increment();

        let protected = Command::from_bytes(raw)
            .map_err(|_| IntegrityFailure::Malformed("command framing"))?;
        if protected.cla & CLA_SECURE_MESSAGING != CLA_SECURE_MESSAGING {
            return Err(IntegrityFailure::Malformed("command is not protected").into());
        }
        let header = protected.header();

        let body = protected.payload();
        let frame = Frame::parse(body, DO_EXPECTED_LENGTH)?;
        let le = match frame.trailer.as_deref() {
            Some([le]) => Some(*le),
            Some(_) => return Err(IntegrityFailure::Malformed("expected length object").into()),
            None => None,
        };

        Self::verify_mac(&self.command_mac(&header, &body[..frame.mac_start]), &frame.mac)?;

        let data = match &frame.cryptogram {
            Some(cryptogram) => Some(Bytes::from(self.decrypt(cryptogram)?)),
            None => None,
        };

        Ok(Command {
            cla: protected.cla & !CLA_SECURE_MESSAGING,
            ins: protected.ins,
            p1: protected.p1,
            p2: protected.p2,
            data,
            le,
        })
    }

    /// Card side: protect a response, always including the status object
    pub fn protect_response(&mut self, response: &Response) -> Result<Bytes> {
        self.increment();
        let status = response.status();

        let mut objects = Vec::new();
        let data = response.data();
        if !data.is_empty() {
            let cryptogram = cbc_encrypt(&self.enc, &self.iv(), data);
            objects.extend_from_slice(&cryptogram_object(&cryptogram)?.to_vec());
        }
        objects.extend_from_slice(&tlv::primitive(DO_STATUS, &status.to_bytes())?.to_vec());

        let mac = self.response_mac(&objects);
        objects.extend_from_slice(&tlv::primitive(DO_MAC, &mac)?.to_vec());
        objects.extend_from_slice(&status.to_bytes());

        Ok(Bytes::from(objects))
    }
}

/// Increment a big-endian counter, carrying across bytes
pub fn increment_counter(counter: &mut [u8]) {
    for byte in counter.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

fn hex_counter(ssc: &Block) -> String {
    ssc.iter().map(|b| format!("{b:02x}")).collect()
}

/// `87` with the padding-content indicator in front of the cryptogram
fn cryptogram_object(cryptogram: &[u8]) -> Result<Tlv> {
    let mut value = Vec::with_capacity(cryptogram.len() + 1);
    value.push(CRYPTOGRAM_PADDED);
    value.extend_from_slice(cryptogram);
    tlv::primitive(DO_CRYPTOGRAM, &value)
}

/// Data objects of one protected frame: `[85|87] [trailer] 8E`
///
/// The trailer is `97` on commands and `99` on responses.
#[derive(Debug)]
struct Frame {
    cryptogram: Option<Vec<u8>>,
    trailer: Option<Vec<u8>>,
    /// Offset of `8E`; the MAC covers everything before it
    mac_start: usize,
    mac: Vec<u8>,
}

impl Frame {
    fn parse(body: &[u8], trailer_tag: u8) -> Result<Self> {
        let objects = tlv::parse_sequence(body)
            .ok_or(IntegrityFailure::Malformed("data object encoding"))?;
        let mut objects = objects.into_iter().peekable();

        let cryptogram = match objects.next_if(|(_, object)| {
            tlv::has_tag(object, DO_CRYPTOGRAM) || tlv::has_tag(object, DO_ODD_CRYPTOGRAM)
        }) {
            Some((_, object)) if tlv::has_tag(&object, DO_CRYPTOGRAM) => {
                match primitive_value(&object)?.split_first() {
                    Some((&CRYPTOGRAM_PADDED, cryptogram)) => Some(cryptogram.to_vec()),
                    _ => return Err(IntegrityFailure::Malformed("unknown padding indicator").into()),
                }
            }
            Some((_, object)) => Some(primitive_value(&object)?.to_vec()),
            None => None,
        };

        let trailer = match objects.next_if(|(_, object)| tlv::has_tag(object, trailer_tag)) {
            Some((_, object)) => Some(primitive_value(&object)?.to_vec()),
            None => None,
        };

        let (mac_start, mac) = match objects.next() {
            Some((offset, object)) if tlv::has_tag(&object, DO_MAC) => {
                (offset, primitive_value(&object)?.to_vec())
            }
            _ => return Err(IntegrityFailure::Malformed("missing MAC object").into()),
        };
        if objects.next().is_some() {
            return Err(IntegrityFailure::Malformed("trailing bytes after MAC").into());
        }

        Ok(Self {
            cryptogram,
            trailer,
            mac_start,
            mac,
        })
    }
}

fn primitive_value(object: &Tlv) -> Result<&[u8]> {
    Ok(tlv::value(object).ok_or(IntegrityFailure::Malformed("constructed data object"))?)
}
