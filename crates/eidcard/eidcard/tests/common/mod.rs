//! Simulated identity document chip
//!
//! Runs the chip side of PACE on P-256, answers through the library's own
//! secure messaging codec in the chip role and signs with P-384 keys. Fault
//! injection covers tag loss, replayed responses, a skipped counter and
//! responses split with `61xx`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use eidcard::crypto::{BLOCK_SIZE, KDF_ENC, KDF_MAC, KDF_PI, SessionKey, cbc_encrypt_unpadded, kdf};
use eidcard::pace::authentication_token;
use eidcard::{CLA_SECURE_MESSAGING, CardKind, CardTransport, CodeType, SecureMessaging, TransportError};
use eidcard_apdu_core::{Command, Response, StatusWord};
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::point::AffineCoordinates;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{FieldBytes, ProjectivePoint, PublicKey, Scalar, U256};
use p384::ecdsa::signature::hazmat::PrehashSigner;
use p384::ecdsa::{Signature, SigningKey};
use parking_lot::Mutex;
use rand_v8::{RngCore, thread_rng};

pub const CAN: &str = "123456";
pub const PIN1: &[u8] = b"1234";
pub const PIN2: &[u8] = b"12345";
pub const PUK: &[u8] = b"12345678";

/// Attempts each code starts with
pub const MAX_TRIES: u8 = 3;

pub const ID1_HISTORICAL_BYTES: &[u8] = &[
    0x00, 0x12, 0x23, 0x3F, 0x53, 0x65, 0x49, 0x44, 0x0F, 0x90, 0x00,
];
pub const THALES_HISTORICAL_BYTES: &[u8] = &[
    0x80, 0x31, 0xD8, 0x53, 0x65, 0x49, 0x44, 0x64, 0xB0, 0x85, 0x05, 0x10, 0x12, 0x23, 0x3F,
];

pub const RECORDS: [&str; 8] = [
    "JÕEORG",
    "JAAK-KRISTJAN",
    "M",
    "EST",
    "08 01 1980 EST",
    "38001085718",
    "AS0000001",
    "08 02 2030",
];

pub const AUTHENTICATION_CERTIFICATE_LENGTH: usize = 1203;
pub const SIGNING_CERTIFICATE_LENGTH: usize = 1517;

const SW_OK: u16 = 0x9000;
const SW_SECURITY_STATUS: u16 = 0x6982;
const SW_BLOCKED: u16 = 0x6983;
const SW_CONDITIONS: u16 = 0x6985;
const SW_WRONG_DATA: u16 = 0x6A80;
const SW_NOT_FOUND: u16 = 0x6A82;
const SW_END_OF_FILE: u16 = 0x6B00;
const SW_UNKNOWN_INS: u16 = 0x6D00;
const SW_SM_INCORRECT: u16 = 0x6988;
const SW_SM_MISSING: u16 = 0x6987;
const SW_PACE_FAILED: u16 = 0x6300;

#[derive(Clone, Copy, PartialEq, Eq)]
enum KeyRole {
    Authentication,
    Signing,
}

struct Code {
    kind: CodeType,
    reference: u8,
    value: Vec<u8>,
    tries: u8,
    verified: bool,
}

enum Pace {
    Idle,
    Started,
    Nonce([u8; 32]),
    Mapped(ProjectivePoint),
    Agreed {
        enc: SessionKey,
        mac: SessionKey,
        host: Vec<u8>,
        chip: Vec<u8>,
    },
}

struct Chip {
    kind: CardKind,
    can: String,
    pace: Pace,
    sm: Option<SecureMessaging>,
    codes: Vec<Code>,
    files: HashMap<Vec<u8>, Vec<u8>>,
    selected: Option<Vec<u8>>,
    key: Option<KeyRole>,
    stored_hash: Option<Vec<u8>>,
    authentication_key: p384::SecretKey,
    signing_key: p384::SecretKey,
    pending: Option<Vec<u8>>,
    max_response: Option<usize>,
    lose_tag_after: Option<usize>,
    lost: bool,
    replay_next: bool,
    last_protected: Option<Vec<u8>>,
    commands: Vec<Bytes>,
}

/// Handle to a simulated chip; clones share the same card
#[derive(Clone)]
pub struct SimulatedChip {
    chip: Arc<Mutex<Chip>>,
}

impl fmt::Debug for SimulatedChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedChip")
            .field("kind", &self.chip.lock().kind)
            .finish_non_exhaustive()
    }
}

impl SimulatedChip {
    pub fn new(kind: CardKind) -> Self {
        Self::with_can(kind, CAN)
    }

    pub fn with_can(kind: CardKind, can: &str) -> Self {
        let filler = match kind {
            CardKind::Id1 => 0xFF,
            CardKind::Thales => 0x00,
        };
        let codes = [(CodeType::Pin1, PIN1), (CodeType::Pin2, PIN2), (CodeType::Puk, PUK)]
            .into_iter()
            .map(|(code, value)| Code {
                kind: code,
                reference: reference(kind, code),
                value: pad(value, filler),
                tries: MAX_TRIES,
                verified: false,
            })
            .collect();

        let (auth_path, sign_path) = match kind {
            CardKind::Id1 => ([0xAD, 0xF1, 0x34, 0x01], [0xAD, 0xF2, 0x34, 0x1F]),
            CardKind::Thales => ([0xAD, 0xF1, 0x34, 0x11], [0xAD, 0xF2, 0x34, 0x21]),
        };
        let mut files: HashMap<Vec<u8>, Vec<u8>> = (1..=8u8)
            .zip(RECORDS)
            .map(|(i, text)| (vec![0x50, i], text.as_bytes().to_vec()))
            .collect();
        files.insert(auth_path.to_vec(), certificate(AUTHENTICATION_CERTIFICATE_LENGTH, 0xA1));
        files.insert(sign_path.to_vec(), certificate(SIGNING_CERTIFICATE_LENGTH, 0x5E));

        Self {
            chip: Arc::new(Mutex::new(Chip {
                kind,
                can: can.to_owned(),
                pace: Pace::Idle,
                sm: None,
                codes,
                files,
                selected: None,
                key: None,
                stored_hash: None,
                authentication_key: p384::SecretKey::random(&mut thread_rng()),
                signing_key: p384::SecretKey::random(&mut thread_rng()),
                pending: None,
                max_response: None,
                lose_tag_after: None,
                lost: false,
                replay_next: false,
                last_protected: None,
                commands: Vec::new(),
            })),
        }
    }

    pub fn tries(&self, code: CodeType) -> u8 {
        self.chip.lock().code(code).tries
    }

    pub fn set_tries(&self, code: CodeType, tries: u8) {
        self.chip.lock().code_mut(code).tries = tries;
    }

    /// Whether `value` is the current value of `code`
    pub fn code_is(&self, code: CodeType, value: &[u8]) -> bool {
        let chip = self.chip.lock();
        let filler = chip.filler();
        chip.code(code).value == pad(value, filler)
    }

    pub fn authentication_public_key(&self) -> p384::PublicKey {
        self.chip.lock().authentication_key.public_key()
    }

    pub fn signing_public_key(&self) -> p384::PublicKey {
        self.chip.lock().signing_key.public_key()
    }

    pub fn authentication_secret(&self) -> p384::SecretKey {
        self.chip.lock().authentication_key.clone()
    }

    /// Leave the field after `exchanges` more commands
    pub fn lose_tag_after(&self, exchanges: usize) {
        self.chip.lock().lose_tag_after = Some(exchanges);
    }

    /// Answer the next protected command with the previous protected response
    pub fn replay_next_response(&self) {
        self.chip.lock().replay_next = true;
    }

    /// Advance the chip's send sequence counter out of step with the host
    pub fn skip_counter(&self) {
        if let Some(sm) = self.chip.lock().sm.as_mut() {
            let mut ssc = *sm.ssc();
            for byte in ssc.iter_mut().rev() {
                *byte = byte.wrapping_add(1);
                if *byte != 0 {
                    break;
                }
            }
            sm.set_ssc(ssc);
        }
    }

    /// Split every response longer than `max` bytes with `61xx`
    pub fn split_responses(&self, max: usize) {
        self.chip.lock().max_response = Some(max);
    }

    pub fn has_tunnel(&self) -> bool {
        self.chip.lock().sm.is_some()
    }

    pub fn ssc(&self) -> Option<[u8; BLOCK_SIZE]> {
        self.chip.lock().sm.as_ref().map(|sm| *sm.ssc())
    }

    /// Raw commands received so far
    pub fn commands(&self) -> Vec<Bytes> {
        self.chip.lock().commands.clone()
    }

    pub fn exchanges(&self) -> usize {
        self.chip.lock().commands.len()
    }
}

impl CardTransport for SimulatedChip {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        self.chip.lock().exchange(command)
    }

    fn is_connected(&self) -> bool {
        !self.chip.lock().lost
    }

    fn historical_bytes(&self) -> Option<Bytes> {
        Some(Bytes::from_static(match self.chip.lock().kind {
            CardKind::Id1 => ID1_HISTORICAL_BYTES,
            CardKind::Thales => THALES_HISTORICAL_BYTES,
        }))
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        let mut chip = self.chip.lock();
        chip.sm = None;
        chip.pace = Pace::Idle;
        Ok(())
    }
}

impl Chip {
    fn filler(&self) -> u8 {
        match self.kind {
            CardKind::Id1 => 0xFF,
            CardKind::Thales => 0x00,
        }
    }

    fn code(&self, code: CodeType) -> &Code {
        self.codes.iter().find(|c| c.kind == code).expect("all codes exist")
    }

    fn code_mut(&mut self, code: CodeType) -> &mut Code {
        self.codes.iter_mut().find(|c| c.kind == code).expect("all codes exist")
    }

    fn exchange(&mut self, raw: &[u8]) -> Result<Bytes, TransportError> {
        if self.lost {
            return Err(TransportError::TagLost);
        }
        if let Some(left) = self.lose_tag_after.as_mut() {
            if *left == 0 {
                self.lost = true;
                self.sm = None;
                return Err(TransportError::TagLost);
            }
            *left -= 1;
        }
        self.commands.push(Bytes::copy_from_slice(raw));

        let Ok(command) = Command::from_bytes(raw) else {
            return Ok(status(0x6700));
        };

        if command.cla & CLA_SECURE_MESSAGING == 0 && command.ins == 0xC0 {
            return Ok(match self.pending.take() {
                Some(rest) => self.deliver(rest),
                None => status(SW_CONDITIONS),
            });
        }

        if command.cla & CLA_SECURE_MESSAGING == CLA_SECURE_MESSAGING {
            let Some(sm) = self.sm.as_mut() else {
                return Ok(status(SW_SM_MISSING));
            };
            let Ok(plain) = sm.unprotect_command(raw) else {
                // The chip drops the session on a bad frame
                self.sm = None;
                return Ok(status(SW_SM_INCORRECT));
            };

            let response = self.process(&plain);
            let Some(sm) = self.sm.as_mut() else {
                return Ok(status(SW_SM_MISSING));
            };
            let protected = sm
                .protect_response(&response)
                .expect("response encodes")
                .to_vec();
            if std::mem::take(&mut self.replay_next) {
                if let Some(previous) = self.last_protected.clone() {
                    return Ok(self.deliver(previous));
                }
            }
            self.last_protected = Some(protected.clone());
            return Ok(self.deliver(protected));
        }

        // Any plain command other than GET RESPONSE ends secure messaging
        self.sm = None;
        let response = self.process(&command);
        Ok(self.deliver(response.to_bytes().to_vec()))
    }

    /// Hand out a full answer, or its first part followed by `61xx`
    fn deliver(&mut self, mut full: Vec<u8>) -> Bytes {
        match self.max_response {
            Some(max) if full.len() > max + 2 => {
                let rest = full.split_off(max);
                let announced = u8::try_from(rest.len() - 2).unwrap_or(0);
                self.pending = Some(rest);
                full.extend_from_slice(&[0x61, announced]);
                Bytes::from(full)
            }
            _ => Bytes::from(full),
        }
    }

    fn process(&mut self, command: &Command) -> Response {
        let data = command.payload().to_vec();
        match (command.ins, command.p1, command.p2) {
            (0x22, 0xC1, 0xA4) => {
                self.pace = Pace::Started;
                for code in &mut self.codes {
                    code.verified = false;
                }
                ok(&[])
            }
            (0x86, _, _) => self.pace_step(&data),
            (0x22, 0x41, _) => {
                self.key = match data.last() {
                    Some(0x81 | 0x01) => Some(KeyRole::Authentication),
                    Some(0x9F | 0x05) => Some(KeyRole::Signing),
                    _ => None,
                };
                if self.key.is_some() { ok(&[]) } else { status_response(SW_WRONG_DATA) }
            }
            (0xA4, p1, p2) => self.select(p1, p2, &data),
            (0xB0, p1, p2) => self.read_binary(p1, p2, command.le),
            (0x20, _, reference) => self.verify(reference, &data),
            (0x24, _, reference) => self.change(reference, &data),
            (0x2C, p1, reference) => self.reset_retry_counter(p1, reference, &data),
            (0xCB, _, _) => self.get_data(&data),
            (0x2A, 0x90, 0xA0) => match data.as_slice() {
                [0x90, len, hash @ ..] if *len as usize == hash.len() => {
                    self.stored_hash = Some(hash.to_vec());
                    ok(&[])
                }
                _ => status_response(SW_WRONG_DATA),
            },
            (0x2A, 0x9E, 0x9A) => {
                let hash = if data.is_empty() {
                    self.stored_hash.take().unwrap_or_default()
                } else {
                    data
                };
                match self.key {
                    Some(role) => self.sign(role, &hash),
                    None => status_response(SW_CONDITIONS),
                }
            }
            (0x88, _, _) => self.sign(KeyRole::Authentication, &data),
            (0x2A, 0x80, 0x86) => self.decipher(&data),
            _ => status_response(SW_UNKNOWN_INS),
        }
    }

    fn pace_step(&mut self, data: &[u8]) -> Response {
        let pace = std::mem::replace(&mut self.pace, Pace::Idle);
        match (pace, data) {
            (Pace::Started, [0x7C, 0x00]) => {
                let mut nonce = [0u8; 32];
                thread_rng().fill_bytes(&mut nonce);
                let password = kdf(self.can.as_bytes(), KDF_PI);
                let Ok(encrypted) = cbc_encrypt_unpadded(&password, &[0; BLOCK_SIZE], &nonce) else {
                    return status_response(SW_CONDITIONS);
                };
                self.pace = Pace::Nonce(nonce);
                ok(&dynamic_object(0x80, &encrypted))
            }
            (Pace::Nonce(nonce), [0x7C, 0x43, 0x81, 0x41, point @ ..]) => {
                let Ok(host) = PublicKey::from_sec1_bytes(point) else {
                    return status_response(SW_WRONG_DATA);
                };
                let key = p256::SecretKey::random(&mut thread_rng());
                let s = <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(&nonce));
                let generator = ProjectivePoint::GENERATOR * s
                    + host.to_projective() * *key.to_nonzero_scalar();
                self.pace = Pace::Mapped(generator);
                ok(&dynamic_object(0x82, key.public_key().to_encoded_point(false).as_bytes()))
            }
            (Pace::Mapped(generator), [0x7C, 0x43, 0x83, 0x41, point @ ..]) => {
                let Ok(host) = PublicKey::from_sec1_bytes(point) else {
                    return status_response(SW_WRONG_DATA);
                };
                let key = p256::SecretKey::random(&mut thread_rng());
                let chip = (generator * *key.to_nonzero_scalar()).to_affine();
                let chip = chip.to_encoded_point(false).as_bytes().to_vec();
                let shared = (host.to_projective() * *key.to_nonzero_scalar()).to_affine();
                let shared_x: [u8; 32] = shared.x().into();

                let response = ok(&dynamic_object(0x84, &chip));
                self.pace = Pace::Agreed {
                    enc: kdf(&shared_x, KDF_ENC),
                    mac: kdf(&shared_x, KDF_MAC),
                    host: point.to_vec(),
                    chip,
                };
                response
            }
            (Pace::Agreed { enc, mac, host, chip }, [0x7C, 0x0A, 0x85, 0x08, token @ ..]) => {
                if authentication_token(&mac, &chip).unwrap().as_slice() != token {
                    return status_response(SW_PACE_FAILED);
                }
                let answer = dynamic_object(0x86, &authentication_token(&mac, &host).unwrap());
                self.sm = Some(SecureMessaging::new(enc, mac));
                ok(&answer)
            }
            _ => status_response(SW_CONDITIONS),
        }
    }

    fn select(&mut self, p1: u8, p2: u8, id: &[u8]) -> Response {
        if p1 == 0x04 {
            self.selected = None;
            return ok(&[]);
        }
        match self.files.get(id) {
            Some(contents) => {
                let size = (contents.len() as u16).to_be_bytes();
                self.selected = Some(id.to_vec());
                if p2 == 0x04 {
                    ok(&[0x62, 0x04, 0x80, 0x02, size[0], size[1]])
                } else {
                    ok(&[])
                }
            }
            None if matches!(id, [0x50, 0x00] | [0xDF, 0xDD]) => {
                self.selected = None;
                ok(&[])
            }
            None => status_response(SW_NOT_FOUND),
        }
    }

    fn read_binary(&self, p1: u8, p2: u8, le: Option<u8>) -> Response {
        let Some(contents) = self.selected.as_ref().and_then(|id| self.files.get(id)) else {
            return status_response(SW_CONDITIONS);
        };
        let offset = usize::from(u16::from_be_bytes([p1 & 0x7F, p2]));
        if offset > contents.len() || (offset == contents.len() && offset > 0) {
            return status_response(SW_END_OF_FILE);
        }
        let wanted = match le {
            Some(0) | None => 256,
            Some(le) => usize::from(le),
        };
        let end = (offset + wanted).min(contents.len());
        ok(&contents[offset..end])
    }

    fn code_by_reference(&mut self, reference: u8) -> Option<&mut Code> {
        self.codes.iter_mut().find(|c| c.reference == reference)
    }

    /// Compare `value` with `code`, counting a failure against it
    fn check(code: &mut Code, value: &[u8]) -> Result<(), u16> {
        if code.tries == 0 {
            return Err(SW_BLOCKED);
        }
        if code.value != value {
            code.tries -= 1;
            code.verified = false;
            return Err(0x63C0 | u16::from(code.tries));
        }
        code.tries = MAX_TRIES;
        code.verified = true;
        Ok(())
    }

    fn verify(&mut self, reference: u8, value: &[u8]) -> Response {
        let Some(code) = self.code_by_reference(reference) else {
            return status_response(SW_WRONG_DATA);
        };
        match Self::check(code, value) {
            Ok(()) => ok(&[]),
            Err(sw) => status_response(sw),
        }
    }

    fn change(&mut self, reference: u8, data: &[u8]) -> Response {
        let Some(code) = self.code_by_reference(reference) else {
            return status_response(SW_WRONG_DATA);
        };
        if data.len() != 24 {
            return status_response(SW_WRONG_DATA);
        }
        let (current, new) = data.split_at(12);
        match Self::check(code, current) {
            Ok(()) => {
                code.value = new.to_vec();
                ok(&[])
            }
            Err(sw) => status_response(sw),
        }
    }

    fn reset_retry_counter(&mut self, p1: u8, reference: u8, data: &[u8]) -> Response {
        let new = match (p1, data.len()) {
            // Unblocking code verified earlier
            (0x02, 12) => {
                let puk = self.code_mut(CodeType::Puk);
                if !puk.verified {
                    return status_response(SW_SECURITY_STATUS);
                }
                data.to_vec()
            }
            (0x00, 24) => {
                let (puk, new) = data.split_at(12);
                if let Err(sw) = Self::check(self.code_mut(CodeType::Puk), puk) {
                    return status_response(sw);
                }
                new.to_vec()
            }
            _ => return status_response(SW_WRONG_DATA),
        };
        let Some(code) = self.code_by_reference(reference) else {
            return status_response(SW_WRONG_DATA);
        };
        code.value = new;
        code.tries = MAX_TRIES;
        ok(&[])
    }

    fn get_data(&mut self, data: &[u8]) -> Response {
        match (self.kind, data) {
            (CardKind::Id1, [0x4D, 0x08, 0x70, 0x06, 0xBF, 0x81, low, 0x02, 0xA0, 0x80]) => {
                let low = *low;
                let Some(code) = self.codes.iter().find(|c| c.reference & 0x0F == low) else {
                    return status_response(SW_NOT_FOUND);
                };
                ok(&[
                    0x70, 0x12, 0xBF, 0x81, low, 0x0E, 0xA0, 0x0C, 0x9A, 0x01, MAX_TRIES, 0x9B,
                    0x01, code.tries, 0x80, 0x01, 0x0C, 0x00, 0x00, 0x00,
                ])
            }
            (CardKind::Thales, [0xA0, 0x03, 0x83, 0x01, reference]) => {
                let reference = *reference;
                let Some(code) = self.code_by_reference(reference) else {
                    return status_response(SW_NOT_FOUND);
                };
                ok(&[0xA0, 0x07, 0x83, 0x01, reference, 0xDF, 0x21, 0x01, code.tries])
            }
            _ => status_response(SW_WRONG_DATA),
        }
    }

    fn sign(&mut self, role: KeyRole, hash: &[u8]) -> Response {
        let (required, secret) = match role {
            KeyRole::Authentication => (CodeType::Pin1, &self.authentication_key),
            KeyRole::Signing => (CodeType::Pin2, &self.signing_key),
        };
        if !self.code(required).verified {
            return status_response(SW_SECURITY_STATUS);
        }
        let signing_key = SigningKey::from(secret);
        let signature: Result<Signature, _> = signing_key.sign_prehash(hash);
        match signature {
            Ok(signature) => ok(&signature.to_bytes()),
            Err(_) => status_response(SW_WRONG_DATA),
        }
    }

    fn decipher(&mut self, data: &[u8]) -> Response {
        if !self.code(CodeType::Pin1).verified || self.key != Some(KeyRole::Authentication) {
            return status_response(SW_SECURITY_STATUS);
        }
        let Some((0x00, point)) = data.split_first().map(|(first, rest)| (*first, rest)) else {
            return status_response(SW_WRONG_DATA);
        };
        let Ok(peer) = p384::PublicKey::from_sec1_bytes(point) else {
            return status_response(SW_WRONG_DATA);
        };
        let shared = p384::ecdh::diffie_hellman(
            self.authentication_key.to_nonzero_scalar(),
            peer.as_affine(),
        );
        ok(shared.raw_secret_bytes())
    }
}

fn reference(kind: CardKind, code: CodeType) -> u8 {
    match (kind, code) {
        (CardKind::Id1, CodeType::Pin1) => 0x01,
        (CardKind::Id1, CodeType::Pin2) => 0x85,
        (CardKind::Id1, CodeType::Puk) => 0x02,
        (CardKind::Thales, CodeType::Pin1) => 0x81,
        (CardKind::Thales, CodeType::Pin2) => 0x82,
        (CardKind::Thales, CodeType::Puk) => 0x83,
    }
}

fn pad(value: &[u8], filler: u8) -> Vec<u8> {
    let mut padded = vec![filler; 12];
    padded[..value.len()].copy_from_slice(value);
    padded
}

/// DER-looking blob of `len` bytes
fn certificate(len: usize, seed: u8) -> Vec<u8> {
    let body = (len - 4) as u16;
    let mut der = vec![0x30, 0x82];
    der.extend_from_slice(&body.to_be_bytes());
    der.extend((0..body).map(|i| seed.wrapping_add(i as u8)));
    der
}

fn dynamic_object(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut object = vec![0x7C, (value.len() + 2) as u8, tag, value.len() as u8];
    object.extend_from_slice(value);
    object
}

fn ok(data: &[u8]) -> Response {
    Response::new(Some(Bytes::copy_from_slice(data)), StatusWord::from_u16(SW_OK))
}

fn status_response(sw: u16) -> Response {
    Response::new(None, StatusWord::from_u16(sw))
}

fn status(sw: u16) -> Bytes {
    Bytes::copy_from_slice(&sw.to_be_bytes())
}
