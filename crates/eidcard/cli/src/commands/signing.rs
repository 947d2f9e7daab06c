//! Commands that use the private keys

use eidcard::{CardSession, CertificateType, webeid};
use eidcard_transport_pcsc::PcscTransport;
use eyre::{WrapErr, ensure};
use tracing::debug;

use crate::utils::{display, secrets};

/// Sign a Web eID challenge with the authentication key
pub(crate) fn authenticate_command(
    session: &CardSession<PcscTransport>,
    origin: &str,
    nonce: &str,
    pin1: Option<&str>,
) -> eyre::Result<()> {
    let hash = webeid::authentication_hash(origin, nonce);
    debug!(hash = %hex::encode(hash), "Authentication challenge");

    let certificate = session
        .certificate(CertificateType::Authentication)
        .wrap_err("failed to read the authentication certificate")?;

    let pin1 = secrets::secret(pin1, "PIN1")?;
    let signature = session
        .authenticate(pin1.as_bytes(), &hash)
        .wrap_err("authentication failed")?;

    println!(
        "{}",
        display::key_value_box(
            "Web eID authentication",
            &[
                ("origin", origin.to_owned()),
                ("signature", hex::encode(signature)),
                ("certificate", hex::encode(certificate.as_der())),
            ],
        )
    );
    Ok(())
}

/// Sign a precomputed hash with the qualified signing key
pub(crate) fn sign_command(
    session: &CardSession<PcscTransport>,
    hash: &str,
    pin2: Option<&str>,
) -> eyre::Result<()> {
    let hash = hex::decode(hash.trim_start_matches("0x")).wrap_err("hash is not valid hex")?;
    ensure!(
        matches!(hash.len(), 32 | 48 | 64),
        "hash must be 32, 48 or 64 bytes, got {}",
        hash.len()
    );

    let pin2 = secrets::secret(pin2, "PIN2")?;
    let signature = session
        .calculate_signature(pin2.as_bytes(), &hash, true)
        .wrap_err("signing failed")?;

    println!("{}", hex::encode(signature));
    Ok(())
}
