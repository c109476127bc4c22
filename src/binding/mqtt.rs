//! MQTT binding with a subscription registry
//!
//! Subscriptions exist only while connected: the registry is cleared every
//! time the connection reaches `DISCONNECTED`, whatever the cause.

use super::{connect, Driver};
use crate::error::{ErrorKind, Fault, RealtimeResult};
use crate::session::connection::ConnectionCore;
use crate::session::journal::{EventKind, Journal, DEFAULT_CHANNEL_CAPACITY};
use crate::session::state::{can_send, ConnectionState};
use crate::session::subscription::{QosLevel, Subscription, SubscriptionRegistry};
use crate::transport::mqtt::{
    valid_publish_topic, MqttConfig, MqttInbound, MqttOutbound, RumqttcConnector,
};
use crate::transport::Connector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Journal payload for MQTT traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttMessage {
    pub topic: String,
    pub message: String,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.topic, self.message)
    }
}

pub(crate) struct Inner<C: Connector> {
    core: ConnectionCore<MqttMessage, C::Outbound>,
    connector: C,
    registry: Arc<SubscriptionRegistry>,
    journal_unsubscribe: AtomicBool,
}

impl<C: Connector> Inner<C> {
    fn on_subscribe_ack(&self, journal: &Journal<MqttMessage>, topic: String, result: Result<(), Fault>) {
        match result {
            Ok(()) => {
                if self.registry.complete_subscribe(&topic).is_some() {
                    info!(topic = %topic, "Subscribed");
                    journal.append(EventKind::Subscribed { topic });
                }
            }
            Err(fault) => {
                if self.registry.abort_subscribe(&topic) {
                    warn!(topic = %topic, fault = %fault, "Subscribe failed");
                    journal.append(EventKind::fault(fault));
                }
            }
        }
    }

    fn on_unsubscribe_ack(&self, journal: &Journal<MqttMessage>, topic: String, result: Result<(), Fault>) {
        match result {
            Ok(()) => {
                if self.registry.complete_unsubscribe(&topic)
                    && self.journal_unsubscribe.load(Ordering::Relaxed)
                {
                    journal.append(EventKind::Unsubscribed { topic });
                }
            }
            Err(fault) => {
                if self.registry.abort_unsubscribe(&topic) {
                    warn!(topic = %topic, fault = %fault, "Unsubscribe failed");
                    journal.append(EventKind::fault(fault));
                }
            }
        }
    }
}

impl<C> Driver for Inner<C>
where
    C: Connector<Config = MqttConfig, Inbound = MqttInbound, Outbound = MqttOutbound>,
{
    type Connector = C;
    type Payload = MqttMessage;

    fn core(&self) -> &ConnectionCore<MqttMessage, MqttOutbound> {
        &self.core
    }

    fn connector(&self) -> &C {
        &self.connector
    }

    fn on_message(&self, generation: u64, message: MqttInbound) {
        self.core.on_connected(generation, |live| match message {
            MqttInbound::Message { topic, message } => {
                live.journal.append(EventKind::MessageReceived {
                    message: MqttMessage { topic, message },
                });
            }
            MqttInbound::SubscribeAck { topic, result } => {
                self.on_subscribe_ack(live.journal, topic, result)
            }
            MqttInbound::UnsubscribeAck { topic, result } => {
                self.on_unsubscribe_ack(live.journal, topic, result)
            }
        });
    }
}

/// MQTT connection tracking its topic subscriptions
pub struct MqttConnection<C: Connector = RumqttcConnector> {
    inner: Arc<Inner<C>>,
}

impl MqttConnection<RumqttcConnector> {
    pub fn new() -> Self {
        Self::with_connector(RumqttcConnector)
    }

    /// Production connector with a custom live journal buffer
    pub fn with_capacity(journal_capacity: usize) -> Self {
        Self::with_connector_and_capacity(RumqttcConnector, journal_capacity)
    }
}

impl Default for MqttConnection<RumqttcConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MqttConnection<C>
where
    C: Connector<Config = MqttConfig, Inbound = MqttInbound, Outbound = MqttOutbound>,
{
    pub fn with_connector(connector: C) -> Self {
        Self::with_connector_and_capacity(connector, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_connector_and_capacity(connector: C, journal_capacity: usize) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let cleared = Arc::clone(&registry);
        let core = ConnectionCore::new("mqtt", journal_capacity).with_teardown(move || cleared.clear());
        Self {
            inner: Arc::new(Inner {
                core,
                connector,
                registry,
                journal_unsubscribe: AtomicBool::new(false),
            }),
        }
    }

    /// Journal `UNSUBSCRIBED` on unsubscribe acks (off by default)
    pub fn set_journal_unsubscribe(&self, enabled: bool) {
        self.inner.journal_unsubscribe.store(enabled, Ordering::Relaxed);
    }

    pub fn connect(&self, config: &MqttConfig) -> RealtimeResult<()> {
        connect(&self.inner, config)
    }

    /// Publish at QoS 0 without retain; no-op unless connected
    ///
    /// Wildcard or empty topics are journaled as `PUBLISH_ERROR` and never sent.
    pub fn publish<T: Into<String>, M: Into<String>>(&self, topic: T, message: M) {
        let payload = MqttMessage {
            topic: topic.into(),
            message: message.into(),
        };
        self.inner.core.with_live(|live| {
            let Some(transport) = live.transport.filter(|_| can_send(live.state)) else {
                debug!(state = %live.state, topic = %payload.topic, "Dropping publish while not connected");
                return;
            };
            if !valid_publish_topic(&payload.topic) {
                warn!(topic = %payload.topic, "Publish to invalid topic");
                let kind = ErrorKind::publish_error(Some(payload.topic), payload.message);
                live.journal.append(EventKind::fault(Fault::new(kind, "invalid topic")));
                return;
            }
            let frame = MqttOutbound::Publish {
                topic: payload.topic.clone(),
                message: payload.message.clone(),
                qos: QosLevel::AtMostOnce,
                retain: false,
            };
            match transport.send(frame) {
                Ok(()) => {
                    live.journal.append(EventKind::MessageSent { message: payload });
                }
                Err(e) => {
                    warn!(topic = %payload.topic, error = %e, "Publish failed");
                    let kind = ErrorKind::publish_error(Some(payload.topic), payload.message);
                    live.journal.append(EventKind::fault(Fault::new(kind, e.to_string())));
                }
            }
        });
    }

    /// Request a subscription; it becomes active when the broker acks it
    pub fn subscribe(&self, subscription: Subscription) {
        let topic = subscription.name.clone();
        self.inner.core.with_live(|live| {
            let Some(transport) = live.transport.filter(|_| can_send(live.state)) else {
                warn!(topic = %topic, state = %live.state, "Subscribe while not connected");
                live.journal.append(EventKind::fault(Fault::new(
                    ErrorKind::subscription_failed(topic.as_str()),
                    "not connected",
                )));
                return;
            };

            let frame = MqttOutbound::Subscribe {
                topic: topic.clone(),
                qos: subscription.qos,
            };
            self.inner.registry.begin_subscribe(subscription);
            if let Err(e) = transport.send(frame) {
                self.inner.registry.abort_subscribe(&topic);
                live.journal.append(EventKind::fault(Fault::new(
                    ErrorKind::subscription_failed(topic.as_str()),
                    e.to_string(),
                )));
            }
        });
    }

    /// Request removal of `topic`; no-op unless connected
    pub fn unsubscribe<S: Into<String>>(&self, topic: S) {
        let topic = topic.into();
        self.inner.core.with_live(|live| {
            let Some(transport) = live.transport.filter(|_| can_send(live.state)) else {
                debug!(topic = %topic, "Ignoring unsubscribe while not connected");
                return;
            };

            self.inner.registry.begin_unsubscribe(topic.clone());
            if let Err(e) = transport.send(MqttOutbound::Unsubscribe {
                topic: topic.clone(),
            }) {
                self.inner.registry.abort_unsubscribe(&topic);
                live.journal.append(EventKind::fault(Fault::new(
                    ErrorKind::subscription_failed(topic.as_str()),
                    e.to_string(),
                )));
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

    pub fn journal(&self) -> Arc<Journal<MqttMessage>> {
        self.inner.core.journal()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.registry.snapshot()
    }

    pub fn watch_subscriptions(&self) -> watch::Receiver<Vec<Subscription>> {
        self.inner.registry.watch()
    }

    pub fn is_subscribing(&self) -> bool {
        self.inner.registry.is_subscribing()
    }

    pub fn watch_subscribing(&self) -> watch::Receiver<bool> {
        self.inner.registry.watch_subscribing()
    }
}
