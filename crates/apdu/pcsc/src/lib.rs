//! PC/SC transport implementation for APDU operations
//!
//! This crate provides an implementation of the `CardTransport` trait from
//! `eidcard-apdu-core` using the PC/SC API, and a `TagReader` that waits for an
//! identity document to be placed on a contactless reader.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use eidcard_apdu_core::{CardTransport, Command, DiscoveryManager};
//! use eidcard_transport_pcsc::{PcscConfig, PcscTagReader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reader = PcscTagReader::new(PcscConfig::default());
//! let mut discovery = DiscoveryManager::new(reader);
//!
//! let mut transport = discovery.discover(Duration::from_secs(60))?;
//! let select = Command::new_with_data(0x00, 0xA4, 0x04, 0x0C, vec![0xA0, 0x00, 0x00, 0x00, 0x77]);
//! let response = transport.transceive(&select)?;
//! println!("SW: {}", response.status());
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

// Core modules
mod config;
mod error;
mod manager;
mod reader;
mod tag_reader;
mod transport;

// Public exports
pub use config::{DEFAULT_POLL_INTERVAL, DEFAULT_TRANSMIT_TIMEOUT, PcscConfig, ShareMode};
pub use error::PcscError;
pub use manager::PcscDeviceManager;
pub use reader::PcscReader;
pub use tag_reader::PcscTagReader;
pub use transport::PcscTransport;

// Re-export pcsc types for convenience
pub use pcsc::Protocols;
