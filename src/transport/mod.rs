//! Transport layer shared by all bindings
//!
//! A [`Connector`] builds one live transport per `connect()`. The transport
//! runs as a tokio task that owns the socket, reports what happens through an
//! [`EventSink`] and takes instructions over an unbounded command channel
//! exposed as a [`TransportHandle`].

use crate::error::{Fault, TransportError};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod mqtt;
pub mod socketio;
pub mod websocket;

/// Normalized callbacks emitted by every transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent<M> {
    /// Handshake finished; the connection is usable
    Opened,
    /// Inbound protocol message
    Received(M),
    /// Connecting failed; no further events follow
    Failed(Fault),
    /// Non-fatal error reported while the transport keeps running
    Error(Fault),
    /// Transport is gone; no further events follow
    Closed { reason: Option<String> },
}

/// Callback sink handed to a transport at construction
pub struct EventSink<M> {
    deliver: Arc<dyn Fn(TransportEvent<M>) + Send + Sync>,
}

impl<M> EventSink<M> {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(TransportEvent<M>) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn emit(&self, event: TransportEvent<M>) {
        (self.deliver)(event)
    }
}

impl<M> Clone for EventSink<M> {
    fn clone(&self) -> Self {
        Self {
            deliver: Arc::clone(&self.deliver),
        }
    }
}

impl<M> fmt::Debug for EventSink<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// Owned handle to a live transport
///
/// Implementations must never call back into the sink synchronously from
/// `send` or `close`; the caller may be holding connection state.
pub trait TransportHandle<O>: Send + Sync {
    /// Queue an outbound frame
    fn send(&self, frame: O) -> Result<(), TransportError>;

    /// Request a graceful close; the transport answers with `Closed`
    fn close(&self);
}

/// Instruction for a transport task
#[derive(Debug)]
pub enum Command<O> {
    Send(O),
    Close,
}

/// [`TransportHandle`] backed by an unbounded command channel
pub struct CommandSender<O> {
    tx: mpsc::UnboundedSender<Command<O>>,
}

impl<O: Send> TransportHandle<O> for CommandSender<O> {
    fn send(&self, frame: O) -> Result<(), TransportError> {
        self.tx
            .send(Command::Send(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }
}

/// Create the command channel between a handle and its transport task
pub fn command_channel<O>() -> (CommandSender<O>, mpsc::UnboundedReceiver<Command<O>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, rx)
}

/// Factory for live transports of one protocol
pub trait Connector: Send + Sync + 'static {
    /// Everything needed to open one transport
    type Config: Send + Sync;
    /// Messages the transport delivers upward
    type Inbound: Send + 'static;
    /// Frames the transport accepts from the binding
    type Outbound: Send + 'static;

    /// Start a transport; errors here mean nothing was spawned
    fn open(
        &self,
        config: &Self::Config,
        sink: EventSink<Self::Inbound>,
    ) -> Result<Box<dyn TransportHandle<Self::Outbound>>, TransportError>;
}

/// Runtime the transport task will be spawned on
pub(crate) fn runtime() -> Result<tokio::runtime::Handle, TransportError> {
    tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)
}
