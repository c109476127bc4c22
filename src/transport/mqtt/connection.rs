//! Pure broker endpoint parsing and MQTT option construction
//!
//! Nothing here performs I/O; the event loop in [`super::client`] consumes
//! the options built here.

use crate::error::TransportError;
use crate::session::QosLevel;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;

/// Default port for MQTT over WebSocket endpoints
pub const DEFAULT_WS_PORT: u16 = 8081;
pub const DEFAULT_TCP_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "realtime";
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Max packet size accepted from the broker
const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Everything needed to open one MQTT session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub url: String,
    /// Applied only when non-empty
    pub username: String,
    /// Applied only when non-empty
    pub password: String,
    pub client_id_prefix: String,
    pub keep_alive: Duration,
}

impl MqttConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            username: String::new(),
            password: String::new(),
            client_id_prefix: DEFAULT_CLIENT_ID_PREFIX.to_string(),
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    pub fn with_credentials<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_client_id_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.client_id_prefix = prefix.into();
        self
    }
}

/// How bytes reach the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerTransport {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl BrokerTransport {
    pub fn is_websocket(self) -> bool {
        matches!(self, BrokerTransport::Ws | BrokerTransport::Wss)
    }
}

/// Parsed broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub transport: BrokerTransport,
    pub host: String,
    pub port: u16,
    /// Path for websocket endpoints, empty for `/`
    pub path: String,
}

impl BrokerEndpoint {
    /// Address handed to rumqttc; websocket transports take the full URL
    pub fn address(&self) -> String {
        match self.transport {
            BrokerTransport::Ws => format!("ws://{}:{}{}", self.host, self.port, self.path),
            BrokerTransport::Wss => format!("wss://{}:{}{}", self.host, self.port, self.path),
            BrokerTransport::Tcp | BrokerTransport::Tls => self.host.clone(),
        }
    }
}

/// Parse a broker URL (pure function)
///
/// `ws`/`wss` default to port 8081; `mqtt`/`mqtts` to 1883/8883.
pub fn parse_broker_url(raw: &str) -> Result<BrokerEndpoint, TransportError> {
    let url = Url::parse(raw.trim()).map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

    let (transport, default_port) = match url.scheme() {
        "ws" => (BrokerTransport::Ws, DEFAULT_WS_PORT),
        "wss" => (BrokerTransport::Wss, DEFAULT_WS_PORT),
        "mqtt" | "tcp" => (BrokerTransport::Tcp, DEFAULT_TCP_PORT),
        "mqtts" | "ssl" => (BrokerTransport::Tls, DEFAULT_TLS_PORT),
        other => {
            return Err(TransportError::UnsupportedScheme {
                protocol: "mqtt",
                scheme: other.to_string(),
            })
        }
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TransportError::InvalidEndpoint(format!("{raw}: missing host")))?;

    let path = match url.path() {
        "/" | "" => String::new(),
        path => path.to_string(),
    };

    Ok(BrokerEndpoint {
        transport,
        host: host.to_string(),
        port: url.port().unwrap_or(default_port),
        path,
    })
}

/// Unique client id so concurrent sessions never collide at the broker
pub fn generate_client_id(prefix: &str) -> String {
    let prefix = prefix.trim();
    let prefix = if prefix.is_empty() {
        DEFAULT_CLIENT_ID_PREFIX
    } else {
        prefix
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..12])
}

/// Topic a message can be published to: non-empty and free of wildcards
pub fn valid_publish_topic(topic: &str) -> bool {
    !topic.is_empty() && rumqttc::mqttbytes::valid_topic(topic)
}

/// Build rumqttc options from config (pure function)
pub fn configure_mqtt_options(config: &MqttConfig) -> Result<MqttOptions, TransportError> {
    let endpoint = parse_broker_url(&config.url)?;
    let client_id = generate_client_id(&config.client_id_prefix);
    let mut options = MqttOptions::new(client_id, endpoint.address(), endpoint.port);

    match endpoint.transport {
        BrokerTransport::Tcp => {}
        BrokerTransport::Tls => {
            options.set_transport(RumqttcTransport::tls_with_default_config());
        }
        BrokerTransport::Ws => {
            options.set_transport(RumqttcTransport::Ws);
        }
        BrokerTransport::Wss => {
            options.set_transport(RumqttcTransport::wss_with_default_config());
        }
    }

    if !config.username.is_empty() || !config.password.is_empty() {
        options.set_credentials(config.username.clone(), config.password.clone());
    }

    options.set_keep_alive(config.keep_alive);
    options.set_clean_start(true);
    options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(options)
}

/// Map our QoS enum onto rumqttc's (pure function)
pub fn to_rumqttc_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}
