//! Socket.IO binding
//!
//! Every server event is journaled as `[name] <json>`; emits request an ack
//! and the ack is journaled as a separate `MESSAGE_RECEIVED` under the name
//! of the event that asked for it.

use super::{connect, Driver};
use crate::error::{ErrorKind, Fault, RealtimeResult};
use crate::session::connection::ConnectionCore;
use crate::session::journal::{EventKind, Journal, DEFAULT_CHANNEL_CAPACITY};
use crate::session::state::{can_send, ConnectionState};
pub use crate::transport::socketio::format_event;
use crate::transport::socketio::{SioInbound, SioOutbound, SocketIoConfig, SocketIoConnector};
use crate::transport::Connector;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Default)]
struct Acks {
    next_id: u64,
    pending: HashMap<u64, String>,
}

pub(crate) struct Inner<C: Connector> {
    core: ConnectionCore<String, C::Outbound>,
    connector: C,
    acks: Arc<Mutex<Acks>>,
}

/// Ack data as a single value: the lone argument, or the whole list
fn ack_value(mut args: Vec<Value>) -> Option<Value> {
    match args.len() {
        0 => None,
        1 => args.pop(),
        _ => Some(Value::Array(args)),
    }
}

impl<C> Driver for Inner<C>
where
    C: Connector<Config = SocketIoConfig, Inbound = SioInbound, Outbound = SioOutbound>,
{
    type Connector = C;
    type Payload = String;

    fn core(&self) -> &ConnectionCore<String, SioOutbound> {
        &self.core
    }

    fn connector(&self) -> &C {
        &self.connector
    }

    fn on_message(&self, generation: u64, message: SioInbound) {
        self.core.on_connected(generation, |live| match message {
            SioInbound::Event { name, args } => {
                live.journal.append(EventKind::MessageReceived {
                    message: format_event(&name, args.first()),
                });
            }
            SioInbound::Ack { id, args } => {
                let Some(event) = self.acks.lock().pending.remove(&id) else {
                    debug!(id, "Ack for unknown emit");
                    return;
                };
                let value = ack_value(args);
                live.journal.append(EventKind::MessageReceived {
                    message: format_event(&event, value.as_ref()),
                });
            }
        });
    }
}

/// Socket.IO connection speaking the v2, v3 or v4 protocol
pub struct SocketIoConnection<C: Connector = SocketIoConnector> {
    inner: Arc<Inner<C>>,
}

impl SocketIoConnection<SocketIoConnector> {
    pub fn new() -> Self {
        Self::with_connector(SocketIoConnector)
    }

    /// Production connector with a custom live journal buffer
    pub fn with_capacity(journal_capacity: usize) -> Self {
        Self::with_connector_and_capacity(SocketIoConnector, journal_capacity)
    }
}

impl Default for SocketIoConnection<SocketIoConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SocketIoConnection<C>
where
    C: Connector<Config = SocketIoConfig, Inbound = SioInbound, Outbound = SioOutbound>,
{
    pub fn with_connector(connector: C) -> Self {
        Self::with_connector_and_capacity(connector, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_connector_and_capacity(connector: C, journal_capacity: usize) -> Self {
        let acks = Arc::new(Mutex::new(Acks::default()));
        let pending = Arc::clone(&acks);
        let core = ConnectionCore::new("socket.io", journal_capacity)
            .with_teardown(move || pending.lock().pending.clear());
        Self {
            inner: Arc::new(Inner {
                core,
                connector,
                acks,
            }),
        }
    }

    /// Connect with the dialect named by `config.version`
    pub fn connect(&self, config: &SocketIoConfig) -> RealtimeResult<()> {
        connect(&self.inner, config)
    }

    /// Emit `event` with one argument and request an ack; dropped unless connected
    pub fn send<S, V>(&self, event: S, payload: V)
    where
        S: Into<String>,
        V: Into<Value>,
    {
        let event = event.into();
        let payload = payload.into();
        self.inner.core.with_live(|live| {
            let Some(transport) = live.transport.filter(|_| can_send(live.state)) else {
                debug!(state = %live.state, event = %event, "Dropping Socket.IO emit while not connected");
                return;
            };

            let text = format_event(&event, Some(&payload));
            let id = {
                let mut acks = self.inner.acks.lock();
                let id = acks.next_id;
                acks.next_id += 1;
                acks.pending.insert(id, event.clone());
                id
            };
            let frame = SioOutbound::Emit {
                event: event.clone(),
                args: vec![payload],
                ack: Some(id),
            };

            match transport.send(frame) {
                Ok(()) => {
                    live.journal.append(EventKind::MessageSent { message: text });
                }
                Err(e) => {
                    self.inner.acks.lock().pending.remove(&id);
                    warn!(event = %event, error = %e, "Socket.IO emit failed");
                    live.journal.append(EventKind::fault(Fault::new(
                        ErrorKind::publish_error(Some(event), text),
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

    /// Emits still waiting for their ack
    pub fn pending_acks(&self) -> usize {
        self.inner.acks.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_event() {
        assert_eq!(format_event("chat", Some(&json!({"a": 1}))), r#"[chat] {"a":1}"#);
        assert_eq!(format_event("chat", Some(&json!("hi"))), r#"[chat] "hi""#);
        assert_eq!(format_event("tick", None), "[tick] ");
        assert_eq!(format_event("tick", Some(&Value::Null)), "[tick] ");
    }

    #[test]
    fn test_ack_value() {
        assert_eq!(ack_value(vec![]), None);
        assert_eq!(ack_value(vec![json!("ok")]), Some(json!("ok")));
        assert_eq!(ack_value(vec![json!(1), json!(2)]), Some(json!([1, 2])));
    }
}
