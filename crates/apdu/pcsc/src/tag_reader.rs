//! Contactless tag detection over PC/SC

use std::collections::HashSet;
use std::ffi::CString;
use std::fmt;
use std::thread;
use std::time::Duration;

use eidcard_apdu_core::{DiscoveryStatus, TagReader, TransportError};
use pcsc::{Context, ReaderState, Scope, State};
use tracing::{debug, trace};

use crate::config::PcscConfig;
use crate::error::{PcscError, transport_error};
use crate::reader::card_present;
use crate::transport::PcscTransport;

/// [`TagReader`] backed by the PC/SC service
///
/// A card counts as a new tap when it is seen entering the field of a reader
/// (or is already there when the first poll runs). It is reported again only
/// after it has left the field.
pub struct PcscTagReader {
    /// `None` when the PC/SC service could not be reached
    context: Option<Context>,
    /// Restrict detection to readers whose name contains this string
    reader_filter: Option<String>,
    config: PcscConfig,
    /// Last observed state per reader
    reader_states: Vec<(CString, State)>,
    /// Readers whose card has already been handed out
    reported: HashSet<CString>,
}

impl fmt::Debug for PcscTagReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTagReader")
            .field("service", &self.context.is_some())
            .field("reader_filter", &self.reader_filter)
            .field("readers", &self.reader_states.len())
            .finish()
    }
}

impl PcscTagReader {
    /// Connect to the PC/SC service; a missing service is reported as
    /// [`DiscoveryStatus::NotSupported`] rather than an error
    pub fn new(config: PcscConfig) -> Self {
        let context = match Context::establish(Scope::User) {
            Ok(context) => Some(context),
            Err(e) => {
                debug!(error = %e, "PC/SC service unavailable");
                None
            }
        };

        Self::with_context(context, config)
    }

    pub(crate) fn with_context(context: Option<Context>, config: PcscConfig) -> Self {
        Self {
            context,
            reader_filter: None,
            config,
            reader_states: Vec::new(),
            reported: HashSet::new(),
        }
    }

    /// Only watch readers whose name contains `name`
    pub fn with_reader_filter(mut self, name: impl Into<String>) -> Self {
        self.reader_filter = Some(name.into());
        self
    }

    fn matches(&self, reader: &CString) -> bool {
        self.reader_filter
            .as_deref()
            .is_none_or(|filter| reader.to_string_lossy().contains(filter))
    }

    fn watched_readers(&self, context: &Context) -> Result<Vec<CString>, pcsc::Error> {
        match context.list_readers_owned() {
            Ok(readers) => Ok(readers.into_iter().filter(|r| self.matches(r)).collect()),
            Err(pcsc::Error::NoReadersAvailable) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Refresh the reader list, keeping the last state of readers still attached
    fn sync_readers(&mut self, readers: Vec<CString>) {
        self.reported.retain(|name| readers.contains(name));
        let previous = std::mem::take(&mut self.reader_states);
        self.reader_states = readers
            .into_iter()
            .map(|name| {
                let state = previous
                    .iter()
                    .find(|(known, _)| *known == name)
                    .map_or(State::UNAWARE, |(_, state)| *state);
                (name, state)
            })
            .collect();
    }
}

impl TagReader for PcscTagReader {
    type Transport = PcscTransport;

    fn status(&mut self) -> DiscoveryStatus {
        let Some(context) = self.context.as_ref() else {
            return DiscoveryStatus::NotSupported;
        };

        match self.watched_readers(context) {
            Ok(readers) if !readers.is_empty() => DiscoveryStatus::Active,
            Ok(_) => DiscoveryStatus::NotActive,
            Err(pcsc::Error::NoService | pcsc::Error::ServiceStopped) => {
                DiscoveryStatus::NotSupported
            }
            Err(e) => {
                debug!(error = %e, "Failed to list readers");
                DiscoveryStatus::NotActive
            }
        }
    }

    fn wait_for_tag(&mut self, timeout: Duration) -> Result<Option<PcscTransport>, TransportError> {
        let context = self.context.clone().ok_or(TransportError::Connection)?;

        let readers = self.watched_readers(&context).map_err(transport_error)?;
        if readers.is_empty() {
            thread::sleep(timeout);
            return Ok(None);
        }
        self.sync_readers(readers);

        let mut native: Vec<ReaderState> = self
            .reader_states
            .iter()
            .map(|(name, state)| ReaderState::new(name.clone(), *state))
            .collect();

        match context.get_status_change(timeout, &mut native) {
            Ok(()) => {}
            Err(pcsc::Error::Timeout) => return Ok(None),
            Err(e) => return Err(transport_error(e)),
        }

        self.reader_states = native
            .iter()
            .map(|rs| (rs.name().to_owned(), rs.event_state()))
            .collect();

        for (name, state) in &self.reader_states {
            trace!(reader = ?name, ?state, "Reader state");
            if !card_present(*state) {
                self.reported.remove(name);
            }
        }

        let tapped = self
            .reader_states
            .iter()
            .find(|(name, state)| card_present(*state) && !self.reported.contains(name))
            .map(|(name, _)| name.clone());

        let Some(name) = tapped else {
            return Ok(None);
        };
        self.reported.insert(name.clone());

        let reader_name = name.to_string_lossy().into_owned();
        debug!(reader = %reader_name, "Tag entered the field");

        match PcscTransport::new(&context, &reader_name, self.config.clone()) {
            Ok(transport) => Ok(Some(transport)),
            // The tag left again before we could connect, wait for the next tap
            Err(PcscError::NoCard(_)) | Err(PcscError::Pcsc(pcsc::Error::RemovedCard)) => {
                self.reported.remove(&name);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
