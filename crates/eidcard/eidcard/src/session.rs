//! Card session: the state machine every operation goes through
//!
//! A [`CardSession`] owns the transport and, once PACE has run, the secure
//! messaging keys. Operations take `&self` and serialize on an internal mutex,
//! so a session shared between threads never interleaves commands.
//!
//! ```text
//! Idle --establish_tunnel--> TunnelEstablished --authenticate/sign--> Authenticated(code)
//!   ^                              |                                      |
//!   +------ PACE or integrity failure, timeout under SM ------------------+
//!
//! any state --close() or tag lost--> Closed
//! ```

use derive_more::Display;
use eidcard_apdu_core::CardTransport;
use parking_lot::Mutex;
use sha2::{Digest, Sha384};
use tracing::{debug, info, warn};

use crate::channel::{Link, PlainLink, SecureLink};
use crate::error::{Error, Result};
use crate::pace;
use crate::personal_data::PersonalData;
use crate::profile::{CardKind, CardProfile};
use crate::secure_messaging::SecureMessaging;
use crate::types::{Can, Certificate, CertificateType, CodeType};

/// Hash lengths the signing keys accept: SHA-256, SHA-384 and SHA-512
const HASH_LENGTHS: [usize; 3] = [32, 48, 64];

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SessionState {
    /// No tunnel; only [`CardSession::establish_tunnel`] is possible
    #[display("idle")]
    Idle,
    /// PACE completed and secure messaging is active
    #[display("tunnel established")]
    TunnelEstablished,
    /// The last operation verified this code
    #[display("authenticated with {_0}")]
    Authenticated(CodeType),
    /// Closed explicitly or after the tag was lost; create a new session
    #[display("closed")]
    Closed,
}

impl SessionState {
    /// Whether protected commands can be sent
    pub const fn has_tunnel(self) -> bool {
        matches!(self, Self::TunnelEstablished | Self::Authenticated(_))
    }
}

#[derive(Debug)]
struct Inner<T> {
    transport: Option<T>,
    sm: Option<SecureMessaging>,
    state: SessionState,
}

impl<T: CardTransport> Inner<T> {
    /// Drop the keys and the transport
    fn close(&mut self) {
        self.sm = None;
        self.transport = None;
        self.state = SessionState::Closed;
    }

    /// Drop the keys and fall back to `Idle`
    fn drop_tunnel(&mut self) {
        self.sm = None;
        self.state = SessionState::Idle;
    }

    /// Apply the state change a failed exchange implies
    fn record_failure(&mut self, error: &Error) {
        match error {
            Error::TagLost => {
                warn!("Tag lost, closing session");
                self.close();
            }
            Error::ChannelIntegrity(failure) => {
                warn!(%failure, "Secure channel integrity failure, dropping tunnel");
                self.drop_tunnel();
            }
            Error::Timeout if self.sm.is_some() => {
                warn!("Timeout under secure messaging, dropping tunnel");
                self.drop_tunnel();
            }
            Error::PaceTunnel(_) => self.drop_tunnel(),
            _ => {}
        }
    }
}

/// Session with one identity document
///
/// Created from a transport handed out by discovery. Any operation other than
/// [`establish_tunnel`](Self::establish_tunnel) needs the PACE tunnel and fails
/// with [`Error::TunnelNotEstablished`] without it. After [`close`](Self::close)
/// or a lost tag every call fails with [`Error::SessionClosed`].
#[derive(Debug)]
pub struct CardSession<T: CardTransport> {
    kind: CardKind,
    inner: Mutex<Inner<T>>,
}

impl<T: CardTransport> CardSession<T> {
    /// Create a session, identifying the document from the transport's historical bytes
    pub fn new(transport: T) -> Result<Self> {
        let kind = transport
            .historical_bytes()
            .as_deref()
            .and_then(CardKind::detect)
            .ok_or(Error::UnsupportedCard)?;
        debug!(%kind, "Detected document");
        Ok(Self::with_kind(transport, kind))
    }

    /// Create a session for a known document family, skipping detection
    pub fn with_kind(transport: T, kind: CardKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(Inner {
                transport: Some(transport),
                sm: None,
                state: SessionState::Idle,
            }),
        }
    }

    /// Document family this session talks to
    pub const fn kind(&self) -> CardKind {
        self.kind
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    fn profile(&self) -> &'static dyn CardProfile {
        self.kind.profile()
    }

    /// Run PACE with `can`
    ///
    /// From `TunnelEstablished` or `Authenticated` the old keys are dropped and
    /// the tunnel is negotiated again. A wrong CAN fails with
    /// [`Error::PaceTunnel`] and leaves the session `Idle`.
    pub fn establish_tunnel(&self, can: &Can) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.state == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        inner.drop_tunnel();
        let transport = inner.transport.as_mut().ok_or(Error::SessionClosed)?;

        match run_pace(self.profile(), transport, can) {
            Ok(sm) => {
                inner.sm = Some(sm);
                inner.state = SessionState::TunnelEstablished;
                info!(kind = %self.kind, "Secure tunnel established");
                Ok(())
            }
            Err(error) => {
                debug!(%error, "PACE failed");
                inner.record_failure(&error);
                Err(error)
            }
        }
    }

    /// Run `operation` through the tunnel and apply the resulting state change
    ///
    /// `verifies` is the code a successful run leaves the session authenticated with.
    fn exchange<R>(
        &self,
        verifies: Option<CodeType>,
        operation: impl FnOnce(&dyn CardProfile, &mut dyn Link) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.state {
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Idle => return Err(Error::TunnelNotEstablished),
            SessionState::TunnelEstablished | SessionState::Authenticated(_) => {}
        }
        let (Some(transport), Some(sm)) = (inner.transport.as_mut(), inner.sm.as_mut()) else {
            return Err(Error::TunnelNotEstablished);
        };

        let result = operation(self.profile(), &mut SecureLink::new(transport, sm));
        match &result {
            Ok(_) => {
                if let Some(code) = verifies {
                    inner.state = SessionState::Authenticated(code);
                }
            }
            Err(error) => inner.record_failure(error),
        }
        result
    }

    /// Read and parse the personal data file
    pub fn personal_data(&self) -> Result<PersonalData> {
        self.exchange(None, |profile, link| profile.personal_data(link))
    }

    /// Read a certificate
    pub fn certificate(&self, kind: CertificateType) -> Result<Certificate> {
        let der = self.exchange(None, |profile, link| profile.certificate(link, kind))?;
        debug!(%kind, len = der.len(), "Read certificate");
        Ok(Certificate::new(kind, der))
    }

    /// Attempts left for `code`
    pub fn code_retry_counter(&self, code: CodeType) -> Result<u8> {
        self.exchange(None, |profile, link| profile.code_retry_counter(link, code))
    }

    /// Verify PIN1 and sign `hash` with the authentication key
    ///
    /// For a Web eID login `hash` is [`authentication_hash`](crate::webeid::authentication_hash).
    /// A wrong PIN fails with [`Error::CodeVerification`] carrying the attempts left.
    pub fn authenticate(&self, pin1: &[u8], hash: &[u8]) -> Result<Vec<u8>> {
        CodeType::Pin1.validate(pin1)?;
        check_hash(hash)?;
        let signature = self.exchange(Some(CodeType::Pin1), |profile, link| {
            profile.authenticate(link, pin1, hash)
        })?;
        debug!(len = signature.len(), "Authentication signature computed");
        Ok(signature)
    }

    /// Verify PIN2 and sign with the signing key
    ///
    /// With `is_hash` set `data` is used as the hash; otherwise it is digested
    /// with SHA-384 first.
    pub fn calculate_signature(&self, pin2: &[u8], data: &[u8], is_hash: bool) -> Result<Vec<u8>> {
        CodeType::Pin2.validate(pin2)?;
        let digest;
        let hash = if is_hash {
            data
        } else {
            digest = Sha384::digest(data);
            digest.as_slice()
        };
        check_hash(hash)?;

        let signature = self.exchange(Some(CodeType::Pin2), |profile, link| {
            profile.calculate_signature(link, pin2, hash)
        })?;
        debug!(len = signature.len(), "Signature computed");
        Ok(signature)
    }

    /// Verify PIN1 and run key agreement with the authentication key
    ///
    /// `data` is the other party's public key; the shared secret is returned.
    pub fn decrypt(&self, pin1: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        CodeType::Pin1.validate(pin1)?;
        if data.is_empty() {
            return Err(Error::InvalidInput("nothing to decrypt"));
        }
        self.exchange(Some(CodeType::Pin1), |profile, link| {
            profile.decrypt(link, pin1, data)
        })
    }

    /// Replace `code` after verifying its current value
    pub fn change_code(&self, code: CodeType, current: &[u8], new: &[u8]) -> Result<()> {
        code.validate(current)?;
        code.validate(new)?;
        self.exchange(None, |profile, link| {
            profile.change_code(link, code, current, new)
        })?;
        info!(%code, "Code changed");
        Ok(())
    }

    /// Reset the retry counter of PIN1 or PIN2 with the PUK and set a new value
    pub fn unblock_and_change_code(&self, puk: &[u8], code: CodeType, new: &[u8]) -> Result<()> {
        if code == CodeType::Puk {
            return Err(Error::InvalidInput("only PIN1 and PIN2 can be unblocked"));
        }
        CodeType::Puk.validate(puk)?;
        code.validate(new)?;
        self.exchange(None, |profile, link| {
            profile.unblock_code(link, puk, code, new)
        })?;
        info!(%code, "Code unblocked");
        Ok(())
    }

    /// Drop the keys and release the transport
    ///
    /// Closing twice is harmless.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Closed {
            debug!("Closing session");
        }
        inner.close();
    }
}

fn run_pace<T: CardTransport>(
    profile: &dyn CardProfile,
    transport: &mut T,
    can: &Can,
) -> Result<SecureMessaging> {
    if let Some(preamble) = profile.pace_preamble() {
        PlainLink::new(&mut *transport).send(&preamble)?;
    }
    pace::negotiate(transport, can)
}

fn check_hash(hash: &[u8]) -> Result<()> {
    if HASH_LENGTHS.contains(&hash.len()) {
        Ok(())
    } else {
        Err(Error::InvalidInput("hash must be 32, 48 or 64 bytes"))
    }
}
