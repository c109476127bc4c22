//! Impure I/O for the MQTT transport
//!
//! One tokio task owns the rumqttc event loop. It drains commands from the
//! binding, polls the broker and reports everything through the sink. There
//! is no reconnection: the first event loop error ends the session.

use super::connection::{configure_mqtt_options, to_rumqttc_qos, MqttConfig};
use super::message_handler::{route_mqtt_event, AckKind, AckTracker, EventRoute};
use crate::classify::{classify_mqtt_connection, classify_mqtt_request, MqttRequest, Phase};
use crate::error::{ErrorKind, Fault, TransportError};
use crate::session::QosLevel;
use crate::transport::{
    command_channel, runtime, Command, Connector, EventSink, TransportEvent, TransportHandle,
};
use rumqttc::v5::{AsyncClient, Event, EventLoop};
use rumqttc::Outgoing;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of rumqttc's request channel
const REQUEST_CAPACITY: usize = 64;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Frames the binding hands to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttOutbound {
    Publish {
        topic: String,
        message: String,
        qos: QosLevel,
        retain: bool,
    },
    Subscribe {
        topic: String,
        qos: QosLevel,
    },
    Unsubscribe {
        topic: String,
    },
}

/// Messages the transport hands to the binding
#[derive(Debug, Clone, PartialEq)]
pub enum MqttInbound {
    Message {
        topic: String,
        message: String,
    },
    SubscribeAck {
        topic: String,
        result: Result<(), Fault>,
    },
    UnsubscribeAck {
        topic: String,
        result: Result<(), Fault>,
    },
}

/// Production connector backed by rumqttc's v5 client
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttcConnector;

impl Connector for RumqttcConnector {
    type Config = MqttConfig;
    type Inbound = MqttInbound;
    type Outbound = MqttOutbound;

    fn open(
        &self,
        config: &MqttConfig,
        sink: EventSink<MqttInbound>,
    ) -> Result<Box<dyn TransportHandle<MqttOutbound>>, TransportError> {
        let options = configure_mqtt_options(config)?;
        let runtime = runtime()?;

        let client_id = options.client_id();
        let (host, port) = options.broker_address();
        let span = crate::transport_span!(protocol = "mqtt", host = %host, port);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (handle, commands) = command_channel();

        let session = Session {
            client,
            sink,
            tracker: AckTracker::default(),
            phase: Phase::Handshake,
        };
        info!(client_id = %client_id, host = %host, port, "Starting MQTT session");
        runtime.spawn(session.run(event_loop, commands).instrument(span));
        Ok(Box::new(handle))
    }
}

struct Session {
    client: AsyncClient,
    sink: EventSink<MqttInbound>,
    tracker: AckTracker,
    phase: Phase,
}

impl Session {
    async fn run(
        mut self,
        mut event_loop: EventLoop,
        mut commands: mpsc::UnboundedReceiver<Command<MqttOutbound>>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send(frame)) => self.submit(frame),
                    Some(Command::Close) | None => {
                        self.shutdown(&mut event_loop).await;
                        self.sink.emit(TransportEvent::Closed { reason: None });
                        return;
                    }
                },
                event = event_loop.poll() => match event {
                    Ok(event) => {
                        if let Some(reason) = self.on_event(&event) {
                            self.sink.emit(TransportEvent::Closed { reason: Some(reason) });
                            return;
                        }
                    }
                    Err(e) => {
                        let fault = classify_mqtt_connection(&e, self.phase);
                        error!(error = %e, phase = ?self.phase, "MQTT event loop error");
                        match self.phase {
                            Phase::Handshake => self.sink.emit(TransportEvent::Failed(fault)),
                            Phase::Open => self.sink.emit(TransportEvent::Closed { reason: fault.detail }),
                        }
                        return;
                    }
                },
            }
        }
    }

    /// Queue a request with rumqttc; failures are reported, never raised
    fn submit(&mut self, frame: MqttOutbound) {
        match frame {
            MqttOutbound::Publish {
                topic,
                message,
                qos,
                retain,
            } => {
                let result = self.client.try_publish(
                    topic.clone(),
                    to_rumqttc_qos(qos),
                    retain,
                    message.clone().into_bytes(),
                );
                if let Err(e) = result {
                    warn!(topic = %topic, error = %e, "Publish rejected");
                    let fault = classify_mqtt_request(
                        &e,
                        MqttRequest::Publish {
                            topic: &topic,
                            message: &message,
                        },
                    );
                    self.sink.emit(TransportEvent::Error(fault));
                }
            }
            MqttOutbound::Subscribe { topic, qos } => {
                match self.client.try_subscribe(topic.clone(), to_rumqttc_qos(qos)) {
                    Ok(()) => self.tracker.queue(AckKind::Subscribe, topic),
                    Err(e) => {
                        let fault = classify_mqtt_request(&e, MqttRequest::Subscribe { topic: &topic });
                        self.sink.emit(TransportEvent::Received(MqttInbound::SubscribeAck {
                            topic,
                            result: Err(fault),
                        }));
                    }
                }
            }
            MqttOutbound::Unsubscribe { topic } => match self.client.try_unsubscribe(topic.clone()) {
                Ok(()) => self.tracker.queue(AckKind::Unsubscribe, topic),
                Err(e) => {
                    let fault = classify_mqtt_request(&e, MqttRequest::Unsubscribe { topic: &topic });
                    self.sink.emit(TransportEvent::Received(MqttInbound::UnsubscribeAck {
                        topic,
                        result: Err(fault),
                    }));
                }
            },
        }
    }

    /// Handle one broker event; `Some(reason)` ends the session
    fn on_event(&mut self, event: &Event) -> Option<String> {
        match route_mqtt_event(event) {
            EventRoute::ConnAck => {
                if self.phase == Phase::Handshake {
                    self.phase = Phase::Open;
                    info!("MQTT session established");
                    self.sink.emit(TransportEvent::Opened);
                }
            }
            EventRoute::Message { topic, message } => {
                self.sink
                    .emit(TransportEvent::Received(MqttInbound::Message { topic, message }));
            }
            EventRoute::SubscribeSent(pkid) => self.tracker.sent(AckKind::Subscribe, pkid),
            EventRoute::UnsubscribeSent(pkid) => self.tracker.sent(AckKind::Unsubscribe, pkid),
            EventRoute::SubAck { pkid, success } => {
                if let Some(topic) = self.tracker.acknowledged(AckKind::Subscribe, pkid) {
                    let result = ack_result(success, &topic, "subscribe rejected by broker");
                    self.sink
                        .emit(TransportEvent::Received(MqttInbound::SubscribeAck { topic, result }));
                }
            }
            EventRoute::UnsubAck { pkid, success } => {
                if let Some(topic) = self.tracker.acknowledged(AckKind::Unsubscribe, pkid) {
                    let result = ack_result(success, &topic, "unsubscribe rejected by broker");
                    self.sink
                        .emit(TransportEvent::Received(MqttInbound::UnsubscribeAck { topic, result }));
                }
            }
            EventRoute::Disconnected { reason } => {
                warn!(reason = %reason, "Broker sent DISCONNECT");
                return Some(format!("disconnected by broker: {reason}"));
            }
            EventRoute::Other => {}
        }
        None
    }

    /// Send DISCONNECT and let the event loop flush it
    async fn shutdown(&self, event_loop: &mut EventLoop) {
        if self.phase == Phase::Handshake {
            return;
        }
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "Disconnect request not queued");
            return;
        }
        let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
    }
}

fn ack_result(success: bool, topic: &str, detail: &str) -> Result<(), Fault> {
    if success {
        Ok(())
    } else {
        Err(Fault::new(ErrorKind::subscription_failed(topic), detail))
    }
}
