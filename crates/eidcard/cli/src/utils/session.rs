//! Opening a card session

use eidcard::{Can, CardSession};
use eidcard_apdu_core::{DiscoveryManager, DiscoveryStatus};
use eidcard_transport_pcsc::{PcscTagReader, PcscTransport};
use eyre::{WrapErr, bail};
use tracing::{debug, info};

use crate::config::Config;
use crate::utils::secrets;

/// Wait for a document, identify it and open the PACE tunnel with the CAN
pub(crate) fn open_session(
    config: &Config,
    can: Option<&str>,
) -> eyre::Result<CardSession<PcscTransport>> {
    let transport = wait_for_document(config)?;
    info!(reader = transport.reader_name(), "Document presented");

    let session = CardSession::new(transport).wrap_err("document not recognised")?;
    debug!(kind = %session.kind(), "Detected document");

    let can = secrets::secret(can, "CAN")?;
    let can = Can::new(can.as_str())?;
    session
        .establish_tunnel(&can)
        .wrap_err("failed to open the secure tunnel")?;

    Ok(session)
}

fn wait_for_document(config: &Config) -> eyre::Result<PcscTransport> {
    let mut tag_reader = PcscTagReader::new(config.pcsc());
    if let Some(name) = &config.reader {
        tag_reader = tag_reader.with_reader_filter(name.as_str());
    }

    let mut discovery = DiscoveryManager::new(tag_reader).with_poll_interval(config.poll_interval());
    match discovery.status() {
        DiscoveryStatus::Active => info!("Waiting for a document to be presented"),
        status => bail!("contactless reader is {status}"),
    }

    discovery
        .discover(config.discovery_timeout())
        .wrap_err("no document presented")
}
