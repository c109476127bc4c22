//! Realtime Session - protocol-agnostic realtime connection manager
//!
//! # Overview
//!
//! One connection lifecycle, one event journal and one error taxonomy shared
//! by three transport bindings:
//! - [`WebSocketConnection`] for plain WebSocket endpoints
//! - [`SocketIoConnection`] for Socket.IO servers speaking v2, v3 or v4
//! - [`MqttConnection`] for MQTT brokers over TCP, TLS or WebSocket
//!
//! Each binding exposes its state as a `tokio::sync::watch` channel and its
//! history as an append-only [`Journal`] with snapshot and broadcast access.
//! Failures never surface as panics or returned errors once a transport is
//! running; they are classified and journaled as `ERROR` events.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use realtime_session::{ConnectionState, WebSocketConnection, WebSocketConfig};
//!
//! # tokio_test::block_on(async {
//! let connection = WebSocketConnection::new();
//! connection
//!     .connect(&WebSocketConfig::new("wss://echo.example.com").with_protocols(["chat"]))
//!     .unwrap();
//!
//! let mut state = connection.watch_state();
//! while *state.borrow_and_update() == ConnectionState::Connecting {
//!     state.changed().await.unwrap();
//! }
//! connection.send("ping");
//!
//! for event in connection.journal().snapshot() {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! connection.disconnect();
//! # });
//! ```

pub mod binding;
pub mod classify;
pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use binding::{MqttConnection, MqttMessage, SocketIoConnection, WebSocketConnection};
pub use config::{ConfigError, RealtimeConfig};
pub use error::{ErrorKind, Fault, RealtimeError, RealtimeResult, TransportError};
pub use session::{
    ConnectionState, Event, EventKind, Journal, QosLevel, Subscription, SubscriptionRegistry,
};
pub use transport::mqtt::MqttConfig;
pub use transport::socketio::{ClientVersion, SocketIoConfig};
pub use transport::websocket::WebSocketConfig;
pub use transport::{Connector, EventSink, TransportEvent, TransportHandle};
