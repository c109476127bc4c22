//! Mock connectors for testing
//!
//! A [`MockConnector`] never touches the network. It records every config it
//! was opened with and every frame sent to it, and lets the test drive the
//! transport callbacks synchronously through the sinks it captured.

use crate::error::{ErrorKind, Fault, TransportError};
use crate::transport::mqtt::{MqttConfig, MqttInbound, MqttOutbound};
use crate::transport::socketio::{SioInbound, SioOutbound, SocketIoConfig};
use crate::transport::websocket::WebSocketConfig;
use crate::transport::{Connector, EventSink, TransportEvent, TransportHandle};
use parking_lot::Mutex;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

struct MockState<C, I, O> {
    configs: Vec<C>,
    sinks: Vec<EventSink<I>>,
    sent: Vec<O>,
    closes: usize,
    refuse_open: Option<String>,
    refuse_sends: bool,
}

impl<C, I, O> Default for MockState<C, I, O> {
    fn default() -> Self {
        Self {
            configs: Vec::new(),
            sinks: Vec::new(),
            sent: Vec::new(),
            closes: 0,
            refuse_open: None,
            refuse_sends: false,
        }
    }
}

/// Scriptable [`Connector`]; clones share state
pub struct MockConnector<C, I, O> {
    state: Arc<Mutex<MockState<C, I, O>>>,
}

pub type MockWebSocket = MockConnector<WebSocketConfig, String, String>;
pub type MockSocketIo = MockConnector<SocketIoConfig, SioInbound, SioOutbound>;
pub type MockMqtt = MockConnector<MqttConfig, MqttInbound, MqttOutbound>;

impl<C, I, O> Clone for MockConnector<C, I, O> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<C, I, O> Default for MockConnector<C, I, O> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }
}

impl<C: Clone, I, O: Clone> MockConnector<C, I, O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` calls fail with `reason`
    pub fn refuse_open<S: Into<String>>(&self, reason: S) {
        self.state.lock().refuse_open = Some(reason.into());
    }

    /// Make every handle reject outbound frames
    pub fn refuse_sends(&self, refuse: bool) {
        self.state.lock().refuse_sends = refuse;
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().sinks.len()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn configs(&self) -> Vec<C> {
        self.state.lock().configs.clone()
    }

    pub fn sent(&self) -> Vec<O> {
        self.state.lock().sent.clone()
    }

    /// Deliver `event` through the most recently opened transport
    pub fn emit(&self, event: TransportEvent<I>) {
        let sink = self.state.lock().sinks.last().cloned();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    /// Deliver `event` through the transport opened `index`-th (from 0)
    pub fn emit_to(&self, index: usize, event: TransportEvent<I>) {
        let sink = self.state.lock().sinks.get(index).cloned();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn receive(&self, message: I) {
        self.emit(TransportEvent::Received(message));
    }

    pub fn close(&self, reason: Option<&str>) {
        self.emit(TransportEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }

    pub fn fail<S: AsRef<str>>(&self, detail: S) {
        self.emit(TransportEvent::Failed(Fault::new(ErrorKind::ConnectionFailed, detail)));
    }

    pub fn error<S: AsRef<str>>(&self, detail: S) {
        self.emit(TransportEvent::Error(Fault::new(ErrorKind::Transport, detail)));
    }
}

impl MockMqtt {
    pub fn ack_subscribe<S: Into<String>>(&self, topic: S) {
        self.receive(MqttInbound::SubscribeAck {
            topic: topic.into(),
            result: Ok(()),
        });
    }

    pub fn reject_subscribe<S: Into<String>>(&self, topic: S) {
        let topic = topic.into();
        let fault = Fault::new(ErrorKind::subscription_failed(topic.as_str()), "not authorized");
        self.receive(MqttInbound::SubscribeAck {
            topic,
            result: Err(fault),
        });
    }

    pub fn ack_unsubscribe<S: Into<String>>(&self, topic: S) {
        self.receive(MqttInbound::UnsubscribeAck {
            topic: topic.into(),
            result: Ok(()),
        });
    }

    pub fn message<T: Into<String>, M: Into<String>>(&self, topic: T, message: M) {
        self.receive(MqttInbound::Message {
            topic: topic.into(),
            message: message.into(),
        });
    }
}

impl MockSocketIo {
    pub fn server_event<S: Into<String>>(&self, name: S, args: Vec<Value>) {
        self.receive(SioInbound::Event {
            name: name.into(),
            args,
        });
    }

    pub fn ack(&self, id: u64, args: Vec<Value>) {
        self.receive(SioInbound::Ack { id, args });
    }

    /// Ack id of the most recent emit
    pub fn last_ack_id(&self) -> Option<u64> {
        self.sent().iter().rev().find_map(|frame| match frame {
            SioOutbound::Emit { ack, .. } => *ack,
        })
    }
}

impl<C, I, O> Connector for MockConnector<C, I, O>
where
    C: Clone + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Config = C;
    type Inbound = I;
    type Outbound = O;

    fn open(
        &self,
        config: &C,
        sink: EventSink<I>,
    ) -> Result<Box<dyn TransportHandle<O>>, TransportError> {
        let mut state = self.state.lock();
        state.configs.push(config.clone());
        if let Some(reason) = state.refuse_open.clone() {
            return Err(TransportError::InvalidEndpoint(reason));
        }
        state.sinks.push(sink);
        Ok(Box::new(MockHandle {
            state: Arc::clone(&self.state),
            _inbound: PhantomData,
        }))
    }
}

struct MockHandle<C, I, O> {
    state: Arc<Mutex<MockState<C, I, O>>>,
    _inbound: PhantomData<fn() -> I>,
}

impl<C, I, O> TransportHandle<O> for MockHandle<C, I, O>
where
    C: Send,
    I: Send,
    O: Send,
{
    fn send(&self, frame: O) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.refuse_sends {
            return Err(TransportError::Closed);
        }
        state.sent.push(frame);
        Ok(())
    }

    fn close(&self) {
        self.state.lock().closes += 1;
    }
}
