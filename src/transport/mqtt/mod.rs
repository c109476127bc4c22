//! MQTT transport over rumqttc
//!
//! Split the same way as the rest of the transport layer: pure functions
//! first, I/O last.
//!
//! - [`connection`] - broker URL parsing and option construction
//! - [`message_handler`] - event routing and ack correlation
//! - [`client`] - the event loop task and its connector

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttInbound, MqttOutbound, RumqttcConnector};
pub use connection::{
    configure_mqtt_options, parse_broker_url, valid_publish_topic, BrokerEndpoint, BrokerTransport,
    MqttConfig,
};
pub use message_handler::{route_mqtt_event, AckKind, AckTracker, EventRoute};
