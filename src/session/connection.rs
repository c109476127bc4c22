//! Connection core shared by every binding
//!
//! Owns the state watch channel, the journal and the live transport handle.
//! All mutation happens inside one short critical section that never runs
//! caller code, so observers and bindings can call back in freely.

use super::journal::{EventKind, Journal};
use super::state::{
    can_connect, close_outcome, failure_signal, log_transition, next_state, CloseOutcome,
    ConnectionState, Signal,
};
use crate::error::{ErrorKind, Fault, RealtimeError, TransportError};
use crate::transport::{TransportEvent, TransportHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

type Teardown = Box<dyn Fn() + Send + Sync>;

struct Link<O> {
    transport: Option<Box<dyn TransportHandle<O>>>,
    generation: u64,
    manual_disconnect: bool,
}

/// View of the connection handed to binding closures under the lock
pub(crate) struct Live<'a, P, O> {
    pub state: ConnectionState,
    pub transport: Option<&'a dyn TransportHandle<O>>,
    pub journal: &'a Journal<P>,
}

pub(crate) struct ConnectionCore<P, O> {
    protocol: &'static str,
    state: watch::Sender<ConnectionState>,
    journal: Arc<Journal<P>>,
    link: Mutex<Link<O>>,
    teardown: Option<Teardown>,
}

impl<P: Clone, O> ConnectionCore<P, O> {
    pub fn new(protocol: &'static str, journal_capacity: usize) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            protocol,
            state,
            journal: Arc::new(Journal::with_capacity(journal_capacity)),
            link: Mutex::new(Link {
                transport: None,
                generation: 0,
                manual_disconnect: false,
            }),
            teardown: None,
        }
    }

    /// Run `teardown` every time the connection reaches `DISCONNECTED`
    pub fn with_teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.teardown = Some(Box::new(teardown));
        self
    }

    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn journal(&self) -> Arc<Journal<P>> {
        Arc::clone(&self.journal)
    }

    pub fn generation(&self) -> u64 {
        self.link.lock().generation
    }

    /// Enter `CONNECTING` and return the generation for the new transport
    pub fn begin_connect(&self) -> Result<u64, RealtimeError> {
        let mut link = self.link.lock();
        let current = self.state();
        if !can_connect(current) {
            return Err(RealtimeError::AlreadyActive { state: current });
        }

        if link.manual_disconnect {
            // Previous transport never confirmed the close.
            link.manual_disconnect = false;
            self.journal.append(EventKind::Disconnected { manual: true });
        }
        if let Some(stale) = link.transport.take() {
            stale.close();
        }

        link.generation += 1;
        self.apply(Signal::ConnectRequested);
        self.journal.append(EventKind::Connecting);
        debug!(
            protocol = self.protocol,
            generation = link.generation,
            "Connect requested"
        );
        Ok(link.generation)
    }

    /// Install the transport built for `generation`
    ///
    /// Returns false and closes the handle when the attempt was superseded
    /// or already ended.
    pub fn attach(&self, generation: u64, transport: Box<dyn TransportHandle<O>>) -> bool {
        let mut link = self.link.lock();
        if link.generation != generation || self.state() == ConnectionState::Disconnected {
            transport.close();
            return false;
        }
        if let Some(previous) = link.transport.replace(transport) {
            previous.close();
        }
        true
    }

    /// Transport construction failed before any callback fired
    pub fn abort_connect(&self, generation: u64, error: &TransportError) {
        let mut link = self.link.lock();
        if link.generation != generation || self.state() == ConnectionState::Disconnected {
            return;
        }
        warn!(protocol = self.protocol, error = %error, "Connection not established");
        if let Some(transport) = link.transport.take() {
            transport.close();
        }
        let fault = Fault::new(ErrorKind::ConnectionNotEstablished, error.to_string());
        self.journal.append(EventKind::fault(fault));
        self.enter_disconnected(failure_signal(self.state()));
    }

    /// Apply a lifecycle callback; inbound messages are handed back
    pub fn lifecycle<M>(&self, generation: u64, event: TransportEvent<M>) -> Option<M> {
        match event {
            TransportEvent::Opened => self.on_opened(generation),
            TransportEvent::Received(message) => return Some(message),
            TransportEvent::Failed(fault) => self.on_failed(generation, fault),
            TransportEvent::Error(fault) => self.on_error(generation, fault),
            TransportEvent::Closed { reason } => self.on_closed(generation, reason),
        }
        None
    }

    fn on_opened(&self, generation: u64) {
        let link = self.link.lock();
        if link.generation != generation || self.state() != ConnectionState::Connecting {
            return;
        }
        self.apply(Signal::Opened);
        self.journal.append(EventKind::Connected);
    }

    fn on_failed(&self, generation: u64, fault: Fault) {
        let mut link = self.link.lock();
        if link.generation != generation {
            return;
        }
        match self.state() {
            ConnectionState::Disconnected => {
                if std::mem::take(&mut link.manual_disconnect) {
                    self.journal.append(EventKind::Disconnected { manual: true });
                }
            }
            _ => {
                warn!(protocol = self.protocol, fault = %fault, "Connection failed");
                link.transport = None;
                link.manual_disconnect = false;
                self.journal.append(EventKind::fault(fault));
                self.enter_disconnected(failure_signal(self.state()));
            }
        }
    }

    fn on_error(&self, generation: u64, fault: Fault) {
        let link = self.link.lock();
        if link.generation != generation || self.state() == ConnectionState::Disconnected {
            return;
        }
        debug!(protocol = self.protocol, fault = %fault, "Transport error");
        self.journal.append(EventKind::fault(fault));
    }

    fn on_closed(&self, generation: u64, reason: Option<String>) {
        let mut link = self.link.lock();
        if link.generation != generation {
            return;
        }
        let manual = std::mem::take(&mut link.manual_disconnect);
        link.transport = None;

        match close_outcome(self.state(), manual) {
            CloseOutcome::Manual => {
                self.journal.append(EventKind::Disconnected { manual: true });
            }
            CloseOutcome::Lost => {
                let fault = match reason {
                    Some(reason) => Fault::new(ErrorKind::ConnectionLost, reason),
                    None => Fault::bare(ErrorKind::ConnectionLost),
                };
                self.journal.append(EventKind::fault(fault));
            }
            CloseOutcome::Failed => {
                let fault = match reason {
                    Some(reason) => Fault::new(ErrorKind::ConnectionFailed, reason),
                    None => Fault::bare(ErrorKind::ConnectionFailed),
                };
                self.journal.append(EventKind::fault(fault));
            }
            CloseOutcome::Ignored => return,
        }
        self.enter_disconnected(Signal::Closed);
    }

    /// Close the transport and force `DISCONNECTED`; no-op when idle
    pub fn disconnect(&self) {
        let mut link = self.link.lock();
        let current = self.state();

        match link.transport.take() {
            Some(transport) => {
                link.manual_disconnect = true;
                transport.close();
            }
            None if current == ConnectionState::Disconnected => return,
            None => {
                // Transport still under construction; orphan it.
                link.generation += 1;
                self.journal.append(EventKind::Disconnected { manual: true });
            }
        }
        info!(protocol = self.protocol, "Disconnect requested");
        self.enter_disconnected(Signal::DisconnectRequested);
    }

    /// Run `f` against the connection if `generation` is still current
    pub fn on_current<R>(&self, generation: u64, f: impl FnOnce(Live<'_, P, O>) -> R) -> Option<R> {
        let link = self.link.lock();
        if link.generation != generation {
            return None;
        }
        Some(f(self.live(&link)))
    }

    /// Like [`Self::on_current`] but also requires `CONNECTED`
    pub fn on_connected<R>(&self, generation: u64, f: impl FnOnce(Live<'_, P, O>) -> R) -> Option<R> {
        let link = self.link.lock();
        if link.generation != generation || self.state() != ConnectionState::Connected {
            return None;
        }
        Some(f(self.live(&link)))
    }

    /// Run `f` against the connection whatever its generation
    pub fn with_live<R>(&self, f: impl FnOnce(Live<'_, P, O>) -> R) -> R {
        let link = self.link.lock();
        f(self.live(&link))
    }

    fn live<'a>(&'a self, link: &'a Link<O>) -> Live<'a, P, O> {
        Live {
            state: self.state(),
            transport: link.transport.as_deref(),
            journal: &self.journal,
        }
    }

    fn enter_disconnected(&self, signal: Signal) {
        self.apply(signal);
        if let Some(teardown) = &self.teardown {
            teardown();
        }
    }

    fn apply(&self, signal: Signal) {
        let previous = *self.state.borrow();
        let next = next_state(previous, signal);
        if previous == next {
            return;
        }
        log_transition(self.protocol, previous, next);
        self.state.send_replace(next);
    }
}

impl<P, O> Drop for ConnectionCore<P, O> {
    fn drop(&mut self) {
        if let Some(transport) = self.link.get_mut().transport.take() {
            transport.close();
        }
    }
}
