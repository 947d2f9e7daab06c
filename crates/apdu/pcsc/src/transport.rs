//! PC/SC transport implementation
//!
//! The card handle lives on a dedicated worker thread. Each exchange is posted to
//! the worker and the caller waits on the reply for at most
//! [`PcscConfig::transmit_timeout`], so a stalled reader never blocks a session
//! indefinitely. A timed-out transport is poisoned: the exchange may still be in
//! flight on the card, so no further command is sent through it and later calls
//! report [`TransportError::TagLost`]. Callers need a fresh connection.

use std::ffi::CString;
use std::fmt;
use std::result::Result;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use eidcard_apdu_core::prelude::*;
use eidcard_apdu_core::atr;
use pcsc::{Card, Context, Disposition, MAX_BUFFER_SIZE, Protocols};
use tracing::{debug, warn};

use crate::config::{PcscConfig, ShareMode};
use crate::error::{PcscError, transport_error};

enum Request {
    Transmit {
        command: Bytes,
        reply: Sender<Result<Bytes, pcsc::Error>>,
    },
    Reconnect {
        reply: Sender<Result<(), pcsc::Error>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connected,
    Lost,
    /// An exchange timed out and may still occupy the worker
    Poisoned,
}

impl LinkState {
    /// Whether another command may be posted to the worker
    const fn ready(self) -> Result<(), TransportError> {
        match self {
            Self::Connected => Ok(()),
            // A stalled card is as good as gone; the session has to reconnect
            Self::Lost | Self::Poisoned => Err(TransportError::TagLost),
        }
    }
}

/// Transport implementation using PC/SC
pub struct PcscTransport {
    /// Reader name
    reader_name: String,
    /// Configuration
    config: PcscConfig,
    /// ATR reported when the connection was made
    atr: Vec<u8>,
    /// Request queue of the card worker
    requests: Option<Sender<Request>>,
    /// Card worker thread
    worker: Option<JoinHandle<()>>,
    /// Link health
    state: LinkState,
}

impl fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTransport")
            .field("reader_name", &self.reader_name)
            .field("atr", &hex::encode(&self.atr))
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

impl PcscTransport {
    /// Connect to the card in the named reader and start its worker
    pub(crate) fn new(
        context: &Context,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<Self, PcscError> {
        let reader_cstr = CString::new(reader_name)
            .map_err(|_| PcscError::ReaderNotFound(reader_name.to_string()))?;

        let card = match context.connect(&reader_cstr, config.share_mode.into(), config.protocols)
        {
            Ok(card) => card,
            Err(pcsc::Error::NoSmartcard) => {
                return Err(PcscError::NoCard(reader_name.to_string()));
            }
            Err(pcsc::Error::UnknownReader) => {
                return Err(PcscError::ReaderNotFound(reader_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let atr = card.get_attribute_owned(pcsc::Attribute::AtrString)?;
        debug!(reader = reader_name, atr = %hex::encode(&atr), "Connected to card");

        let (requests, inbox) = crossbeam_channel::unbounded();
        let share_mode = config.share_mode;
        let protocols = config.protocols;
        let worker = thread::Builder::new()
            .name(format!("eidcard-pcsc-{reader_name}"))
            .spawn(move || run_card_worker(card, inbox, share_mode, protocols))
            .map_err(|e| PcscError::Other(format!("Failed to spawn card worker: {e}")))?;

        Ok(Self {
            reader_name: reader_name.to_string(),
            config,
            atr,
            requests: Some(requests),
            worker: Some(worker),
            state: LinkState::Connected,
        })
    }

    /// Get the ATR of the current card
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Configuration this transport was opened with
    pub const fn config(&self) -> &PcscConfig {
        &self.config
    }

    fn sender(&self) -> Result<&Sender<Request>, TransportError> {
        self.state.ready()?;
        self.requests.as_ref().ok_or(TransportError::Connection)
    }

    fn await_reply<T>(
        &mut self,
        reply: &Receiver<Result<T, pcsc::Error>>,
    ) -> Result<T, TransportError> {
        match reply.recv_timeout(self.config.transmit_timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let error = transport_error(e);
                if error.is_tag_lost() {
                    warn!(reader = %self.reader_name, "Card left the field");
                    self.state = LinkState::Lost;
                }
                Err(error)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    reader = %self.reader_name,
                    timeout = ?self.config.transmit_timeout,
                    "Card did not answer in time"
                );
                self.state = LinkState::Poisoned;
                Err(TransportError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.state = LinkState::Lost;
                Err(TransportError::TagLost)
            }
        }
    }
}

fn run_card_worker(
    mut card: Card,
    inbox: Receiver<Request>,
    share_mode: ShareMode,
    protocols: Protocols,
) {
    let mut buffer = [0u8; MAX_BUFFER_SIZE];

    for request in inbox.iter() {
        match request {
            Request::Transmit { command, reply } => {
                let result = card
                    .transmit(&command, &mut buffer)
                    .map(Bytes::copy_from_slice);
                let _ = reply.send(result);
            }
            Request::Reconnect { reply } => {
                let result = card.reconnect(share_mode.into(), protocols, Disposition::ResetCard);
                let _ = reply.send(result);
            }
        }
    }

    if let Err((_, e)) = card.disconnect(Disposition::LeaveCard) {
        debug!(error = %e, "Card disconnect failed");
    }
}

impl CardTransport for PcscTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let (reply, response) = crossbeam_channel::bounded(1);
        self.sender()?
            .send(Request::Transmit {
                command: Bytes::copy_from_slice(command),
                reply,
            })
            .map_err(|_| TransportError::TagLost)?;

        self.await_reply(&response)
    }

    fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    fn historical_bytes(&self) -> Option<Bytes> {
        atr::historical_bytes(&self.atr)
            .ok()
            .map(Bytes::copy_from_slice)
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        let (reply, response) = crossbeam_channel::bounded(1);
        self.requests
            .as_ref()
            .ok_or(TransportError::Connection)?
            .send(Request::Reconnect { reply })
            .map_err(|_| TransportError::TagLost)?;

        self.await_reply(&response)?;
        self.state = LinkState::Connected;
        Ok(())
    }
}

impl Drop for PcscTransport {
    fn drop(&mut self) {
        // Closing the queue stops the worker once it finishes its current request
        self.requests.take();

        if let Some(worker) = self.worker.take() {
            if self.state == LinkState::Poisoned {
                debug!(reader = %self.reader_name, "Detaching stalled card worker");
                return;
            }
            if worker.join().is_err() {
                warn!(reader = %self.reader_name, "Card worker panicked");
            }
        }
    }
}
