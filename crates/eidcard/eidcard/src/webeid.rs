//! Web eID authentication challenge

use sha2::{Digest, Sha384, Sha512};

/// Length of [`authentication_hash`]
pub const AUTHENTICATION_HASH_LENGTH: usize = 48;

/// Hash signed by [`CardSession::authenticate`](crate::CardSession::authenticate) for a Web eID login:
/// `SHA-384(SHA-512(origin) || SHA-512(nonce))`
pub fn authentication_hash(origin: &str, nonce: impl AsRef<[u8]>) -> [u8; AUTHENTICATION_HASH_LENGTH] {
    let origin_hash = Sha512::digest(origin.as_bytes());
    let nonce_hash = Sha512::digest(nonce.as_ref());

    let mut hasher = Sha384::new();
    hasher.update(origin_hash);
    hasher.update(nonce_hash);
    hasher.finalize().into()
}
