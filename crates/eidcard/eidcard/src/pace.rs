//! PACE key agreement (BSI TR-03110 generic mapping on NIST P-256)
//!
//! Establishes the secure messaging keys from the Card Access Number. The four
//! GENERAL AUTHENTICATE steps are sent unprotected as one command chain; the
//! first three carry the chaining bit.

use eidcard_apdu_core::response::status::common::AUTHENTICATION_FAILED;
use eidcard_apdu_core::{CardTransport, Command};
use iso7816_tlv::ber::{Tlv, Value};
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::point::AffineCoordinates;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{FieldBytes, ProjectivePoint, PublicKey, Scalar, SecretKey, U256};
use rand_v8::thread_rng;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::channel::transmit_plain;
use crate::commands::pace::{
    DYNAMIC_AUTHENTICATION_DATA, PACE_OID, general_authenticate, set_authentication_template,
};
use crate::crypto::{
    BLOCK_SIZE, KDF_ENC, KDF_MAC, KDF_PI, MAC_LENGTH, SessionKey, cbc_decrypt_unpadded, cmac8, kdf,
};
use crate::error::{Error, PaceFailure, Result};
use crate::secure_messaging::SecureMessaging;
use crate::tlv;
use crate::types::Can;

/// Dynamic authentication data tags, in the order the steps use them
const TAG_ENCRYPTED_NONCE: u8 = 0x80;
const TAG_MAPPING_HOST: u8 = 0x81;
const TAG_MAPPING_CHIP: u8 = 0x82;
const TAG_AGREEMENT_HOST: u8 = 0x83;
const TAG_AGREEMENT_CHIP: u8 = 0x84;
const TAG_TOKEN_HOST: u8 = 0x85;
const TAG_TOKEN_CHIP: u8 = 0x86;

/// Public key data object hashed into the authentication token
const TAG_PUBLIC_KEY: [u8; 2] = [0x7F, 0x49];
const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
const TAG_PUBLIC_POINT: u8 = 0x86;

const NONCE_LENGTH: usize = 32;
/// Uncompressed SEC1 point on P-256
const POINT_LENGTH: usize = 65;

/// Run PACE with `can` and return a fresh secure messaging channel (SSC zero)
///
/// `63 00` at any step or a token mismatch is [`PaceFailure::WrongCan`] /
/// [`PaceFailure::TokenMismatch`]; other status words are
/// [`Error::ApduResponse`].
pub fn negotiate<T: CardTransport + ?Sized>(
    transport: &mut T,
    can: &Can,
) -> Result<SecureMessaging> {
    debug!("Starting PACE");
    step(transport, &set_authentication_template()?)?;

    // 1. Encrypted nonce
    let answer = step(transport, &general_authenticate(TAG_ENCRYPTED_NONCE, &[], false)?)?;
    let encrypted_nonce = dynamic_object(&answer, TAG_ENCRYPTED_NONCE, NONCE_LENGTH)?;
    let password_key = kdf(can.as_bytes(), KDF_PI);
    let nonce = Zeroizing::new(
        cbc_decrypt_unpadded(&password_key, &[0; BLOCK_SIZE], &encrypted_nonce)
            .map_err(|_| PaceFailure::Handshake("nonce is not block aligned"))?,
    );
    debug!("PACE nonce decrypted");

    // 2. Generic mapping: G' = G·s + B1·a1
    let mapping_key = SecretKey::random(&mut thread_rng());
    let answer = step(
        transport,
        &general_authenticate(TAG_MAPPING_HOST, &encode(&mapping_key.public_key()), false)?,
    )?;
    let chip_mapping = chip_point(&answer, TAG_MAPPING_CHIP)?;
    let generator = map_generator(&nonce, &chip_mapping, &mapping_key);
    if generator == ProjectivePoint::IDENTITY {
        return Err(PaceFailure::Handshake("mapped generator is the identity").into());
    }
    debug!("PACE generator mapped");

    // 3. Key agreement on the mapped generator
    let agreement_key = SecretKey::random(&mut thread_rng());
    let host_agreement = (generator * *agreement_key.to_nonzero_scalar()).to_affine();
    let host_agreement = host_agreement.to_encoded_point(false);
    let answer = step(
        transport,
        &general_authenticate(TAG_AGREEMENT_HOST, host_agreement.as_bytes(), false)?,
    )?;
    let chip_agreement = chip_point(&answer, TAG_AGREEMENT_CHIP)?;
    let chip_agreement_bytes = encode(&chip_agreement);
    if chip_agreement_bytes.as_slice() == host_agreement.as_bytes() {
        return Err(PaceFailure::Handshake("chip echoed our public key").into());
    }

    let shared = (chip_agreement.to_projective() * *agreement_key.to_nonzero_scalar()).to_affine();
    let shared_x = Zeroizing::new(<[u8; 32]>::from(shared.x()));
    let enc = kdf(shared_x.as_slice(), KDF_ENC);
    let mac = kdf(shared_x.as_slice(), KDF_MAC);
    debug!("PACE session keys derived");

    // 4. Mutual authentication
    let host_token = authentication_token(&mac, &chip_agreement_bytes)?;
    let answer = step(transport, &general_authenticate(TAG_TOKEN_HOST, &host_token, true)?)?;
    let chip_token = dynamic_object(&answer, TAG_TOKEN_CHIP, MAC_LENGTH)?;
    let expected = authentication_token(&mac, host_agreement.as_bytes())?;
    if !bool::from(expected.as_slice().ct_eq(&chip_token)) {
        warn!("PACE chip token mismatch");
        return Err(PaceFailure::TokenMismatch.into());
    }

    debug!("PACE tunnel established");
    Ok(SecureMessaging::new(enc, mac))
}

/// Authentication token `T(P)`: CMAC over the public key data object of `point`
pub fn authentication_token(mac: &SessionKey, point: &[u8]) -> Result<[u8; MAC_LENGTH]> {
    let public_key = tlv::constructed(
        &TAG_PUBLIC_KEY,
        vec![
            tlv::primitive(TAG_OBJECT_IDENTIFIER, &PACE_OID)?,
            tlv::primitive(TAG_PUBLIC_POINT, point)?,
        ],
    )?;
    Ok(cmac8(mac, &public_key.to_vec()))
}

fn map_generator(nonce: &[u8], chip_mapping: &PublicKey, mapping_key: &SecretKey) -> ProjectivePoint {
    let s = <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(nonce));
    ProjectivePoint::GENERATOR * s
        + chip_mapping.to_projective() * *mapping_key.to_nonzero_scalar()
}

/// Send one handshake command and return its data
fn step<T: CardTransport + ?Sized>(transport: &mut T, command: &Command) -> Result<Vec<u8>> {
    let response = transmit_plain(transport, command)?;
    match response.status() {
        status if status.is_success() => Ok(response.data().to_vec()),
        AUTHENTICATION_FAILED => {
            warn!(ins = format_args!("{:02X}", command.ins), "PACE step rejected the CAN");
            Err(PaceFailure::WrongCan.into())
        }
        status => Err(Error::status(status)),
    }
}

/// Unwrap `7C { tag value }` and check the value length
fn dynamic_object(data: &[u8], tag: u8, len: usize) -> Result<Vec<u8>> {
    let (outer, rest) = Tlv::parse(data);
    outer
        .ok()
        .filter(|outer| rest.is_empty() && tlv::has_tag(outer, DYNAMIC_AUTHENTICATION_DATA))
        .and_then(|outer| match outer.value() {
            Value::Constructed(children) => match children.as_slice() {
                [inner] if tlv::has_tag(inner, tag) => tlv::value(inner).map(<[u8]>::to_vec),
                _ => None,
            },
            Value::Primitive(_) => None,
        })
        .filter(|value| value.len() == len)
        .ok_or_else(|| PaceFailure::Handshake("unexpected dynamic authentication data").into())
}

fn chip_point(data: &[u8], tag: u8) -> Result<PublicKey> {
    let bytes = dynamic_object(data, tag, POINT_LENGTH)?;
    PublicKey::from_sec1_bytes(&bytes)
        .map_err(|_| PaceFailure::Handshake("chip key is not a point on P-256").into())
}

fn encode(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}
