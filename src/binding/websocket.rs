//! Plain WebSocket binding

use super::{connect, Driver};
use crate::error::{ErrorKind, Fault, RealtimeResult};
use crate::session::connection::ConnectionCore;
use crate::session::journal::{EventKind, Journal, DEFAULT_CHANNEL_CAPACITY};
use crate::session::state::{can_send, ConnectionState};
use crate::transport::websocket::{TungsteniteConnector, WebSocketConfig};
use crate::transport::Connector;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

pub(crate) struct Inner<C: Connector> {
    core: ConnectionCore<String, C::Outbound>,
    connector: C,
}

impl<C> Driver for Inner<C>
where
    C: Connector<Config = WebSocketConfig, Inbound = String, Outbound = String>,
{
    type Connector = C;
    type Payload = String;

    fn core(&self) -> &ConnectionCore<String, String> {
        &self.core
    }

    fn connector(&self) -> &C {
        &self.connector
    }

    fn on_message(&self, generation: u64, message: String) {
        self.core.on_connected(generation, |live| {
            live.journal.append(EventKind::MessageReceived { message });
        });
    }
}

/// WebSocket connection with a journal of text frames
pub struct WebSocketConnection<C: Connector = TungsteniteConnector> {
    inner: Arc<Inner<C>>,
}

impl WebSocketConnection<TungsteniteConnector> {
    pub fn new() -> Self {
        Self::with_connector(TungsteniteConnector)
    }

    /// Production connector with a custom live journal buffer
    pub fn with_capacity(journal_capacity: usize) -> Self {
        Self::with_connector_and_capacity(TungsteniteConnector, journal_capacity)
    }
}

impl Default for WebSocketConnection<TungsteniteConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> WebSocketConnection<C>
where
    C: Connector<Config = WebSocketConfig, Inbound = String, Outbound = String>,
{
    pub fn with_connector(connector: C) -> Self {
        Self::with_connector_and_capacity(connector, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_connector_and_capacity(connector: C, journal_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: ConnectionCore::new("websocket", journal_capacity),
                connector,
            }),
        }
    }

    /// Open a socket offering `config.protocols` in the handshake
    ///
    /// Only a second call while connecting or connected is an error; endpoint
    /// and runtime problems are journaled as `CONNECTION_NOT_ESTABLISHED`.
    pub fn connect(&self, config: &WebSocketConfig) -> RealtimeResult<()> {
        connect(&self.inner, config)
    }

    /// Send a text frame; dropped unless connected
    pub fn send<S: Into<String>>(&self, message: S) {
        let message = message.into();
        self.inner.core.with_live(|live| {
            let Some(transport) = live.transport.filter(|_| can_send(live.state)) else {
                debug!(state = %live.state, "Dropping WebSocket send while not connected");
                return;
            };
            match transport.send(message.clone()) {
                Ok(()) => {
                    live.journal.append(EventKind::MessageSent { message });
                }
                Err(e) => {
                    warn!(error = %e, "WebSocket send failed");
                    live.journal.append(EventKind::fault(Fault::new(
                        ErrorKind::publish_error(None, message),
                        e.to_string(),
                    )));
                }
            }
        });
    }

    pub fn disconnect(&self) {
        self.inner.core.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.core.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.core.watch_state()
    }

    pub fn journal(&self) -> Arc<Journal<String>> {
        self.inner.core.journal()
    }
}
