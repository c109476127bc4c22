//! Socket.IO client transport
//!
//! - [`packet`] - Engine.IO and Socket.IO text codec
//! - [`dialect`] - per-version client behaviour
//! - [`client`] - the transport task and its connector

pub mod client;
pub mod dialect;
pub mod packet;

pub use client::{resolve_endpoint, SioInbound, SioOutbound, SocketIoConfig, SocketIoConnector};
pub use dialect::{dialect_for, ClientVersion, Dialect};
pub use packet::{format_event, EnginePacket, Packet, PacketError, PacketKind};
