//! Session engine for Estonian identity documents
//!
//! Sets up a PACE tunnel to the document chip with the Card Access Number and
//! sends every further command through ISO/IEC 7816-4 secure messaging.
//!
//! ## Overview
//!
//! - [`CardSession`] is the entry point: create it from a transport handed out
//!   by discovery, call [`CardSession::establish_tunnel`], then read personal
//!   data and certificates, sign, authenticate or manage codes
//! - [`pace`] runs the key agreement on its own, for callers that manage the
//!   transport themselves
//! - [`SecureMessaging`] wraps and unwraps protected frames, in both the host
//!   and the chip role
//! - [`webeid`] computes the Web eID authentication challenge
//!
//! ```no_run
//! # use eidcard::{Can, CardSession, CodeType, Result};
//! # fn run<T: eidcard_apdu_core::CardTransport>(transport: T) -> Result<()> {
//! let session = CardSession::new(transport)?;
//! session.establish_tunnel(&Can::new("123456")?)?;
//! let holder = session.personal_data()?;
//! println!("{} {}", holder.given_names, holder.surname);
//! println!("PIN1 attempts left: {}", session.code_retry_counter(CodeType::Pin1)?);
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

mod channel;
mod commands;
pub mod crypto;
mod error;
pub mod pace;
mod personal_data;
mod profile;
mod secure_messaging;
mod session;
mod tlv;
mod types;
pub mod webeid;

pub use error::{Error, ErrorKind, IntegrityFailure, PaceFailure, Result};
pub use pace::negotiate;
pub use personal_data::{Gender, PersonalData};
pub use profile::CardKind;
pub use secure_messaging::{CLA_SECURE_MESSAGING, MAX_PROTECTED_DATA, SecureMessaging};
pub use session::{CardSession, SessionState};
pub use types::{Can, Certificate, CertificateType, CodeType, MAX_CODE_LENGTH};

pub use eidcard_apdu_core::{CardTransport, TransportError};
