//! Tag discovery
//!
//! A [`DiscoveryManager`] owns a [`TagReader`] and listens for a tap on a
//! dedicated reader thread. Each call to [`DiscoveryManager::start_discovery`]
//! delivers at most one transport (or one error) and then stops listening;
//! a new tap requires a new call. [`DiscoveryManager::discover`] wraps the same
//! machinery in a blocking call with a deadline.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use derive_more::Display;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::transport::{CardTransport, TransportError};

/// Default interval at which the reader thread re-checks for cancellation
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// State of the contactless field on this host
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryStatus {
    /// The host has no contactless capability at all
    #[display("not supported")]
    NotSupported,
    /// Contactless capability exists but is switched off or has no reader
    #[display("not active")]
    NotActive,
    /// Ready to detect tags
    #[display("active")]
    Active,
}

/// Source of tags for the discovery manager
pub trait TagReader: Send + 'static {
    /// Transport handed out for a detected tag
    type Transport: CardTransport + 'static;

    /// Current field status
    fn status(&mut self) -> DiscoveryStatus;

    /// Wait up to `timeout` for a tag to enter the field.
    ///
    /// Returns `Ok(None)` when the wait elapsed without a new tag. A tag that stays
    /// in the field must not be reported twice.
    fn wait_for_tag(&mut self, timeout: Duration) -> Result<Option<Self::Transport>, TransportError>;
}

/// Errors from the blocking discovery API
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Discovery could not start
    #[error("Contactless reader is {0}")]
    Unavailable(DiscoveryStatus),

    /// No tag was presented before the deadline
    #[error("No tag presented before the deadline")]
    Timeout,

    /// Discovery was disabled while waiting
    #[error("Discovery cancelled")]
    Cancelled,

    /// The reader failed while connecting to the tag
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Worker {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Waits for tags and hands out one transport per tap
pub struct DiscoveryManager<R: TagReader> {
    reader: Arc<Mutex<R>>,
    poll_interval: Duration,
    worker: Option<Worker>,
}

impl<R: TagReader> fmt::Debug for DiscoveryManager<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryManager")
            .field("poll_interval", &self.poll_interval)
            .field("active", &self.is_active())
            .finish()
    }
}

impl<R: TagReader> DiscoveryManager<R> {
    /// Create a manager around a tag reader
    pub fn new(reader: R) -> Self {
        Self {
            reader: Arc::new(Mutex::new(reader)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            worker: None,
        }
    }

    /// Set the cancellation poll interval
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Current field status
    pub fn status(&self) -> DiscoveryStatus {
        self.reader.lock().status()
    }

    /// Whether a reader thread is currently listening
    pub fn is_active(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Start listening for a single tap.
    ///
    /// `on_tag_found` runs on the reader thread exactly once, with the connected
    /// transport or the error raised while connecting, unless discovery is disabled
    /// first. Any previous discovery is disabled before the new one starts. The
    /// returned status tells whether listening actually started.
    pub fn start_discovery<F>(&mut self, on_tag_found: F) -> DiscoveryStatus
    where
        F: FnOnce(Result<R::Transport, TransportError>) + Send + 'static,
    {
        self.disable_reader_mode();

        let status = self.status();
        if status != DiscoveryStatus::Active {
            debug!(%status, "Discovery not started");
            return status;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let reader = Arc::clone(&self.reader);
        let poll_interval = self.poll_interval;

        let spawned = thread::Builder::new()
            .name("eidcard-discovery".to_string())
            .spawn(move || {
                let outcome = loop {
                    if flag.load(Ordering::Acquire) {
                        debug!("Discovery cancelled before a tag was found");
                        return;
                    }

                    match reader.lock().wait_for_tag(poll_interval) {
                        Ok(Some(transport)) => break Ok(transport),
                        Ok(None) => continue,
                        Err(e) => break Err(e),
                    }
                };

                if flag.load(Ordering::Acquire) {
                    debug!("Dropping tag found after discovery was disabled");
                    return;
                }

                debug!(found = outcome.is_ok(), "Tag discovery completed");
                on_tag_found(outcome);
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker { cancelled, handle });
                DiscoveryStatus::Active
            }
            Err(e) => {
                warn!(error = %e, "Failed to spawn discovery thread");
                DiscoveryStatus::NotActive
            }
        }
    }

    /// Block until a tag is presented or `timeout` elapses
    pub fn discover(&mut self, timeout: Duration) -> Result<R::Transport, DiscoveryError> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        match self.start_discovery(move |outcome| {
            if let Err(unsent) = tx.send(outcome) {
                debug!(
                    connected = unsent.into_inner().is_ok(),
                    "Discovery stopped waiting, dropping tag"
                );
            }
        }) {
            DiscoveryStatus::Active => {}
            status => return Err(DiscoveryError::Unavailable(status)),
        }

        let received = rx.recv_timeout(timeout);
        self.disable_reader_mode();

        match received {
            Ok(outcome) => Ok(outcome?),
            Err(RecvTimeoutError::Timeout) => {
                drop_late_tag(&rx);
                Err(DiscoveryError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(DiscoveryError::Cancelled),
        }
    }

    /// Stop listening and release the reader thread.
    ///
    /// Returns once the reader thread has exited, except when called from the
    /// reader thread itself (from inside the tag callback), where it only flags
    /// cancellation.
    pub fn disable_reader_mode(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.cancelled.store(true, Ordering::Release);

        if worker.handle.thread().id() == thread::current().id() {
            return;
        }

        if worker.handle.join().is_err() {
            warn!("Discovery thread panicked");
        }
    }
}

/// Release a tag the reader thread delivered between the deadline and its shutdown
fn drop_late_tag<T>(rx: &Receiver<Result<T, TransportError>>) {
    if let Ok(outcome) = rx.try_recv() {
        debug!(
            connected = outcome.is_ok(),
            "Tag arrived after the discovery deadline, dropping it"
        );
    }
}

impl<R: TagReader> Drop for DiscoveryManager<R> {
    fn drop(&mut self) {
        self.disable_reader_mode();
    }
}
