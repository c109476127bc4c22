//! Per-version Socket.IO client behaviour
//!
//! Versions differ in Engine.IO revision, who drives heartbeats, how the
//! namespace is joined and where credentials travel. Each version gets one
//! [`Dialect`] implementation, chosen explicitly through [`dialect_for`].

use super::packet::Packet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Socket.IO client generation to speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientVersion {
    V2,
    V3,
    #[default]
    V4,
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClientVersion::V2 => "v2",
            ClientVersion::V3 => "v3",
            ClientVersion::V4 => "v4",
        })
    }
}

impl std::str::FromStr for ClientVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v2" | "2" => Ok(ClientVersion::V2),
            "v3" | "3" => Ok(ClientVersion::V3),
            "v4" | "4" => Ok(ClientVersion::V4),
            other => Err(format!("unknown Socket.IO client version `{other}`")),
        }
    }
}

pub trait Dialect: Send + Sync + fmt::Debug {
    fn version(&self) -> ClientVersion;

    /// Value of the `EIO` query parameter
    fn engine_revision(&self) -> u8;

    /// True when the client sends pings and the server answers
    fn client_pings(&self) -> bool;

    /// Packet that joins `namespace`, or `None` when the server joins for us
    fn connect_packet(&self, namespace: &str, token: Option<&str>) -> Option<Packet>;

    /// `Authorization` header value for the upgrade request
    fn auth_header(&self, _token: Option<&str>) -> Option<String> {
        None
    }

    /// Human-readable reason from a `CONNECT_ERROR` payload
    fn connect_error_detail(&self, data: Option<&Value>) -> String {
        match data {
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => "connect error".to_string(),
        }
    }
}

fn token_payload(token: Option<&str>) -> Option<Value> {
    token.map(|token| json!({ "token": token }))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct V2;

impl Dialect for V2 {
    fn version(&self) -> ClientVersion {
        ClientVersion::V2
    }

    fn engine_revision(&self) -> u8 {
        3
    }

    fn client_pings(&self) -> bool {
        true
    }

    fn connect_packet(&self, namespace: &str, _token: Option<&str>) -> Option<Packet> {
        (namespace != "/").then(|| Packet::connect(namespace, None))
    }

    fn auth_header(&self, token: Option<&str>) -> Option<String> {
        token.map(|token| format!("Bearer {token}"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct V3;

impl Dialect for V3 {
    fn version(&self) -> ClientVersion {
        ClientVersion::V3
    }

    fn engine_revision(&self) -> u8 {
        4
    }

    fn client_pings(&self) -> bool {
        false
    }

    fn connect_packet(&self, namespace: &str, token: Option<&str>) -> Option<Packet> {
        Some(Packet::connect(namespace, token_payload(token)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct V4;

impl Dialect for V4 {
    fn version(&self) -> ClientVersion {
        ClientVersion::V4
    }

    fn engine_revision(&self) -> u8 {
        4
    }

    fn client_pings(&self) -> bool {
        false
    }

    fn connect_packet(&self, namespace: &str, token: Option<&str>) -> Option<Packet> {
        Some(Packet::connect(namespace, token_payload(token)))
    }

    fn connect_error_detail(&self, data: Option<&Value>) -> String {
        let message = V3.connect_error_detail(data);
        match data.and_then(|d| d.get("data")) {
            Some(extra) => format!("{message} ({extra})"),
            None => message,
        }
    }
}

/// Select the dialect for a client version
pub fn dialect_for(version: ClientVersion) -> Box<dyn Dialect> {
    match version {
        ClientVersion::V2 => Box::new(V2),
        ClientVersion::V3 => Box::new(V3),
        ClientVersion::V4 => Box::new(V4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::socketio::packet::PacketKind;

    #[test]
    fn test_factory_returns_matching_version() {
        for version in [ClientVersion::V2, ClientVersion::V3, ClientVersion::V4] {
            assert_eq!(dialect_for(version).version(), version);
        }
    }

    #[test]
    fn test_engine_revisions() {
        assert_eq!(dialect_for(ClientVersion::V2).engine_revision(), 3);
        assert_eq!(dialect_for(ClientVersion::V3).engine_revision(), 4);
        assert_eq!(dialect_for(ClientVersion::V4).engine_revision(), 4);
    }

    #[test]
    fn test_only_v2_client_pings() {
        assert!(V2.client_pings());
        assert!(!V3.client_pings());
        assert!(!V4.client_pings());
    }

    #[test]
    fn test_v2_auto_joins_default_namespace() {
        assert!(V2.connect_packet("/", Some("t")).is_none());
        let packet = V2.connect_packet("/admin", Some("t")).unwrap();
        assert_eq!(packet.namespace, "/admin");
        assert_eq!(packet.data, None);
    }

    #[test]
    fn test_v2_sends_bearer_header() {
        assert_eq!(V2.auth_header(Some("abc")), Some("Bearer abc".to_string()));
        assert_eq!(V2.auth_header(None), None);
        assert_eq!(V4.auth_header(Some("abc")), None);
    }

    #[test]
    fn test_v3_v4_carry_token_in_connect() {
        for dialect in [dialect_for(ClientVersion::V3), dialect_for(ClientVersion::V4)] {
            let packet = dialect.connect_packet("/", Some("abc")).unwrap();
            assert_eq!(packet.kind, PacketKind::Connect);
            assert_eq!(packet.data, Some(json!({"token": "abc"})));

            let packet = dialect.connect_packet("/", None).unwrap();
            assert_eq!(packet.data, None);
        }
    }

    #[test]
    fn test_connect_error_detail() {
        let payload = json!({"message": "Not authorized", "data": {"code": 401}});
        assert_eq!(V3.connect_error_detail(Some(&payload)), "Not authorized");
        assert_eq!(
            V4.connect_error_detail(Some(&payload)),
            r#"Not authorized ({"code":401})"#
        );
        assert_eq!(
            V2.connect_error_detail(Some(&json!("Invalid namespace"))),
            "Invalid namespace"
        );
        assert_eq!(V4.connect_error_detail(None), "connect error");
    }

    #[test]
    fn test_client_version_parsing() {
        assert_eq!("v2".parse::<ClientVersion>(), Ok(ClientVersion::V2));
        assert_eq!("V3".parse::<ClientVersion>(), Ok(ClientVersion::V3));
        assert_eq!("4".parse::<ClientVersion>(), Ok(ClientVersion::V4));
        assert!("v5".parse::<ClientVersion>().is_err());
        assert_eq!(ClientVersion::default(), ClientVersion::V4);
        assert_eq!(
            serde_json::to_string(&ClientVersion::V3).unwrap(),
            "\"v3\""
        );
    }
}
