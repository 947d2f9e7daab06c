//! Symmetric primitives of id-PACE-ECDH-GM-AES-CBC-CMAC-256 and its secure messaging
//!
//! AES-256 in ECB (single block), CBC with and without ISO/IEC 7816-4 padding,
//! CMAC truncated to 8 bytes, and the SHA-256 based key derivation function of
//! BSI TR-03110.

use std::fmt;

use aes::Aes256;
use aes::cipher::block_padding::{Iso7816, NoPadding, UnpadError};
use aes::cipher::{BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use cipher::inout::PadError;
use cmac::{Cmac, Mac};
use generic_array::GenericArray;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// Length of the truncated CMAC used for tokens and secure messaging
pub const MAC_LENGTH: usize = 8;

/// First byte of ISO/IEC 7816-4 padding
pub const PADDING_INDICATOR: u8 = 0x80;

/// One AES block
pub type Block = [u8; BLOCK_SIZE];

/// KDF counter for the encryption key
pub const KDF_ENC: u32 = 1;
/// KDF counter for the MAC key
pub const KDF_MAC: u32 = 2;
/// KDF counter for the password key
pub const KDF_PI: u32 = 3;

/// AES-256 key, wiped on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Wrap raw key bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(***)")
    }
}

/// `K = SHA-256(secret || counter)` with a 32-bit big-endian counter
pub fn kdf(secret: &[u8], counter: u32) -> SessionKey {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.update(counter.to_be_bytes());
    SessionKey(hasher.finalize().into())
}

/// Encrypt a single block with AES-256 (ECB), used to derive the SM IV from the counter
pub fn encrypt_block(key: &SessionKey, block: &Block) -> Block {
    let cipher = Aes256::new(GenericArray::from_slice(key.as_bytes()));
    let mut out = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/// AES-256-CBC encryption of `data` with ISO/IEC 7816-4 padding always appended
pub fn cbc_encrypt(key: &SessionKey, iv: &Block, data: &[u8]) -> Vec<u8> {
    Encryptor::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv),
    )
    .encrypt_padded_vec_mut::<Iso7816>(data)
}

/// AES-256-CBC decryption, stripping ISO/IEC 7816-4 padding
pub fn cbc_decrypt(key: &SessionKey, iv: &Block, data: &[u8]) -> Result<Vec<u8>, UnpadError> {
    Decryptor::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv),
    )
    .decrypt_padded_vec_mut::<Iso7816>(data)
}

/// AES-256-CBC encryption of block-aligned data without padding
pub fn cbc_encrypt_unpadded(key: &SessionKey, iv: &Block, data: &[u8]) -> Result<Vec<u8>, PadError> {
    let mut buffer = data.to_vec();
    let len = buffer.len();
    let encrypted = Encryptor::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv),
    )
    .encrypt_padded_mut::<NoPadding>(&mut buffer, len)?;
    Ok(encrypted.to_vec())
}

/// AES-256-CBC decryption of block-aligned data without padding
pub fn cbc_decrypt_unpadded(
    key: &SessionKey,
    iv: &Block,
    data: &[u8],
) -> Result<Vec<u8>, UnpadError> {
    Decryptor::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv),
    )
    .decrypt_padded_vec_mut::<NoPadding>(data)
}

/// AES-256 CMAC truncated to [`MAC_LENGTH`] bytes
pub fn cmac8(key: &SessionKey, data: &[u8]) -> [u8; MAC_LENGTH] {
    let mut mac = <Cmac<Aes256> as KeyInit>::new(GenericArray::from_slice(key.as_bytes()));
    mac.update(data);
    let tag = mac.finalize().into_bytes();

    let mut out = [0u8; MAC_LENGTH];
    out.copy_from_slice(&tag[..MAC_LENGTH]);
    out
}

/// Append ISO/IEC 7816-4 padding (`80 00 ..`) up to the next block boundary
pub fn pad(data: &mut Vec<u8>) {
    data.push(PADDING_INDICATOR);
    while data.len() % BLOCK_SIZE != 0 {
        data.push(0x00);
    }
}

/// Pad only when `data` does not already end on a block boundary
pub fn pad_unaligned(data: &mut Vec<u8>) {
    if data.len() % BLOCK_SIZE != 0 {
        pad(data);
    }
}
