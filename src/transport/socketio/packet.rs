//! Engine.IO and Socket.IO text packet codec
//!
//! Engine.IO frames are `<type>[payload]`. A Socket.IO packet rides inside an
//! Engine.IO `message` frame as `<type>[attachments-][nsp,][ack id][json]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown packet type `{0}`")]
    UnknownType(char),

    #[error("Binary attachments are not supported")]
    BinaryUnsupported,

    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Malformed packet: {0}")]
    Malformed(String),
}

/// Session parameters sent by the server in the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between pings
    pub ping_interval: u64,
    /// Milliseconds to wait for the matching pong
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();
        let probe = || (!rest.is_empty()).then(|| rest.to_string());

        Ok(match kind {
            '0' => EnginePacket::Open(serde_json::from_str(rest)?),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(probe()),
            '3' => EnginePacket::Pong(probe()),
            '4' => EnginePacket::Message(rest.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => return Err(PacketError::UnknownType(other)),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(probe) => format!("2{}", probe.as_deref().unwrap_or("")),
            EnginePacket::Pong(probe) => format!("3{}", probe.as_deref().unwrap_or("")),
            EnginePacket::Message(body) => format!("4{body}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    /// `ERROR` in protocol revision 4 (client v2)
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl PacketKind {
    fn from_char(c: char) -> Result<Self, PacketError> {
        Ok(match c {
            '0' => PacketKind::Connect,
            '1' => PacketKind::Disconnect,
            '2' => PacketKind::Event,
            '3' => PacketKind::Ack,
            '4' => PacketKind::ConnectError,
            '5' => PacketKind::BinaryEvent,
            '6' => PacketKind::BinaryAck,
            other => return Err(PacketError::UnknownType(other)),
        })
    }

    fn as_char(self) -> char {
        match self {
            PacketKind::Connect => '0',
            PacketKind::Disconnect => '1',
            PacketKind::Event => '2',
            PacketKind::Ack => '3',
            PacketKind::ConnectError => '4',
            PacketKind::BinaryEvent => '5',
            PacketKind::BinaryAck => '6',
        }
    }
}

/// A decoded Socket.IO packet
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub namespace: String,
    pub id: Option<u64>,
    pub data: Option<Value>,
}

impl Packet {
    pub fn connect(namespace: &str, auth: Option<Value>) -> Self {
        Self {
            kind: PacketKind::Connect,
            namespace: namespace.to_string(),
            id: None,
            data: auth,
        }
    }

    pub fn disconnect(namespace: &str) -> Self {
        Self {
            kind: PacketKind::Disconnect,
            namespace: namespace.to_string(),
            id: None,
            data: None,
        }
    }

    pub fn event(namespace: &str, name: &str, args: Vec<Value>, id: Option<u64>) -> Self {
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::String(name.to_string()));
        data.extend(args);
        Self {
            kind: PacketKind::Event,
            namespace: namespace.to_string(),
            id,
            data: Some(Value::Array(data)),
        }
    }

    pub fn ack(namespace: &str, id: u64, args: Vec<Value>) -> Self {
        Self {
            kind: PacketKind::Ack,
            namespace: namespace.to_string(),
            id: Some(id),
            data: Some(Value::Array(args)),
        }
    }

    /// Event name and arguments of an `EVENT` packet
    pub fn event_parts(&self) -> Option<(String, Vec<Value>)> {
        if self.kind != PacketKind::Event {
            return None;
        }
        let mut items = match &self.data {
            Some(Value::Array(items)) => items.clone(),
            _ => return None,
        };
        if items.is_empty() {
            return None;
        }
        let name = match items.remove(0) {
            Value::String(name) => name,
            other => other.to_string(),
        };
        Some((name, items))
    }

    /// Arguments of an `ACK` packet
    pub fn ack_args(&self) -> Vec<Value> {
        match &self.data {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let first = text.chars().next().ok_or(PacketError::Empty)?;
        let kind = PacketKind::from_char(first)?;
        if matches!(kind, PacketKind::BinaryEvent | PacketKind::BinaryAck) {
            return Err(PacketError::BinaryUnsupported);
        }

        let mut cursor = first.len_utf8();
        let rest = &text[cursor..];

        let namespace = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let nsp = &rest[..end];
            cursor += (end + 1).min(rest.len());
            nsp.to_string()
        } else {
            "/".to_string()
        };

        let rest = &text[cursor..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 && kind != PacketKind::ConnectError {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|e| PacketError::Malformed(e.to_string()))?;
            cursor += digits;
            Some(parsed)
        } else {
            None
        };

        let body = &text[cursor..];
        let data = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_str(body)?)
        };

        Ok(Self {
            kind,
            namespace,
            id,
            data,
        })
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.as_char());
        if self.namespace != "/" && !self.namespace.is_empty() {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            let _ = write!(out, "{id}");
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Wrap in an Engine.IO `message` frame
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

/// `[event] <json>`; a missing or null value leaves the text empty
pub fn format_event(event: &str, value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => format!("[{event}] "),
        Some(value) => format!("[{event}] {value}"),
    }
}
