//! Map transport library errors onto the closed [`ErrorKind`] taxonomy
//!
//! Classification depends on where the failure happened: the same I/O error
//! means "could not connect" during the handshake and "connection lost" once
//! the transport is open.

use crate::error::{ErrorKind, Fault};
use rumqttc::v5::{ClientError, ConnectionError};
use tokio_tungstenite::tungstenite::Error as WsError;

/// Where in the transport lifecycle a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the transport reported `Opened`
    Handshake,
    /// After the transport reported `Opened`
    Open,
}

/// MQTT request that produced a client error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttRequest<'a> {
    Publish { topic: &'a str, message: &'a str },
    Subscribe { topic: &'a str },
    Unsubscribe { topic: &'a str },
}

/// Classify a WebSocket error
///
/// During the open phase only closure-type errors are fatal; everything else
/// is an `ERROR` passthrough that leaves the connection running.
pub fn classify_ws(error: &WsError, phase: Phase) -> Fault {
    let kind = match (error, phase) {
        (WsError::Url(_), _) => ErrorKind::ConnectionNotEstablished,
        (_, Phase::Handshake) => ErrorKind::ConnectionFailed,
        (WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_), Phase::Open) => {
            ErrorKind::ConnectionLost
        }
        (_, Phase::Open) => ErrorKind::Transport,
    };
    Fault::new(kind, error.to_string())
}

/// Check if a WebSocket error ends the connection
pub fn is_fatal_ws(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_)
    )
}

/// Classify an MQTT event loop error
pub fn classify_mqtt_connection(error: &ConnectionError, phase: Phase) -> Fault {
    let kind = match (error, phase) {
        (ConnectionError::ConnectionRefused(_), _) => ErrorKind::ConnectionFailed,
        (_, Phase::Handshake) => ErrorKind::ConnectionFailed,
        (_, Phase::Open) => ErrorKind::ConnectionLost,
    };
    Fault::new(kind, error.to_string())
}

/// Classify an error returned when queueing an MQTT request
pub fn classify_mqtt_request(error: &ClientError, request: MqttRequest<'_>) -> Fault {
    let kind = match request {
        MqttRequest::Publish { topic, message } => {
            ErrorKind::publish_error(Some(topic.to_string()), message)
        }
        MqttRequest::Subscribe { topic } | MqttRequest::Unsubscribe { topic } => {
            ErrorKind::subscription_failed(topic)
        }
    };
    Fault::new(kind, error.to_string())
}
