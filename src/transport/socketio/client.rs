//! Socket.IO transport: Engine.IO over a single WebSocket
//!
//! Only the websocket transport is spoken; there is no long-polling
//! fallback or upgrade dance.

use super::dialect::{dialect_for, ClientVersion, Dialect};
use super::packet::{format_event, EnginePacket, Packet, PacketError, PacketKind};
use crate::classify::{classify_ws, is_fatal_ws, Phase};
use crate::error::{ErrorKind, Fault, TransportError};
use crate::transport::{
    command_channel, runtime, Command, Connector, EventSink, TransportEvent, TransportHandle,
};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn, Instrument};
use url::Url;

pub const DEFAULT_PATH: &str = "/socket.io";

/// Maximum wait for the Engine.IO open packet
const OPEN_TIMEOUT: Duration = Duration::from_secs(20);
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const MIN_PING_INTERVAL_MS: u64 = 100;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsRead = SplitStream<WsStream>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketIoConfig {
    pub url: String,
    /// Engine.IO mount path; empty means `/socket.io`
    pub path: String,
    pub version: ClientVersion,
    /// Bearer token; attached only when present
    pub bearer_token: Option<String>,
}

impl SocketIoConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            path: DEFAULT_PATH.to_string(),
            version: ClientVersion::default(),
            bearer_token: None,
        }
    }

    pub fn with_path<S: Into<String>>(mut self, path: S) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_version(mut self, version: ClientVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_bearer_token<S: Into<String>>(mut self, token: S) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// Frames the binding hands to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum SioOutbound {
    Emit {
        event: String,
        args: Vec<Value>,
        ack: Option<u64>,
    },
}

/// Messages the transport hands to the binding
#[derive(Debug, Clone, PartialEq)]
pub enum SioInbound {
    Event { name: String, args: Vec<Value> },
    Ack { id: u64, args: Vec<Value> },
}

/// Resolved upgrade URL plus the namespace taken from the URL path (pure function)
pub fn resolve_endpoint(
    config: &SocketIoConfig,
    dialect: &dyn Dialect,
) -> Result<(Url, String), TransportError> {
    let mut url = Url::parse(config.url.trim())
        .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::UnsupportedScheme {
                protocol: "socket.io",
                scheme: other.to_string(),
            })
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidEndpoint(config.url.clone()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(TransportError::InvalidEndpoint(format!(
            "{}: missing host",
            config.url
        )));
    }

    let namespace = match url.path().trim_end_matches('/') {
        "" => "/".to_string(),
        path => path.to_string(),
    };

    let mount = config.path.trim();
    let mount = if mount.is_empty() { DEFAULT_PATH } else { mount };
    let mut path = String::new();
    if !mount.starts_with('/') {
        path.push('/');
    }
    path.push_str(mount.trim_end_matches('/'));
    path.push('/');
    url.set_path(&path);

    let revision = dialect.engine_revision().to_string();
    url.query_pairs_mut()
        .append_pair("EIO", &revision)
        .append_pair("transport", "websocket");

    Ok((url, namespace))
}

/// Production connector for Socket.IO sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketIoConnector;

impl Connector for SocketIoConnector {
    type Config = SocketIoConfig;
    type Inbound = SioInbound;
    type Outbound = SioOutbound;

    fn open(
        &self,
        config: &SocketIoConfig,
        sink: EventSink<SioInbound>,
    ) -> Result<Box<dyn TransportHandle<SioOutbound>>, TransportError> {
        let dialect = dialect_for(config.version);
        let (url, namespace) = resolve_endpoint(config, dialect.as_ref())?;
        let token = config
            .bearer_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
        if let Some(header) = dialect.auth_header(token.as_deref()) {
            let value =
                HeaderValue::from_str(&header).map_err(|e| TransportError::Handshake(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let runtime = runtime()?;
        let span = crate::transport_span!(
            protocol = "socket.io",
            host = url.host_str().unwrap_or_default(),
            version = %config.version
        );
        let (handle, commands) = command_channel();
        let session = Session {
            dialect,
            namespace,
            token,
            sink,
        };
        runtime.spawn(session.run(request, commands).instrument(span));
        Ok(Box::new(handle))
    }
}

enum Exit {
    Failed(Fault),
    Closed(Option<String>),
}

struct Session {
    dialect: Box<dyn Dialect>,
    namespace: String,
    token: Option<String>,
    sink: EventSink<SioInbound>,
}

impl Session {
    async fn run(self, request: Request<()>, mut commands: mpsc::UnboundedReceiver<Command<SioOutbound>>) {
        let target = request.uri().to_string();
        debug!(url = %target, version = %self.dialect.version(), "Opening Socket.IO session");

        let exit = tokio::select! {
            result = tokio_tungstenite::connect_async(request) => match result {
                Ok((ws, _response)) => self.drive(ws, &mut commands).await,
                Err(e) => {
                    warn!(url = %target, error = %e, "Socket.IO handshake failed");
                    Exit::Failed(classify_ws(&e, Phase::Handshake))
                }
            },
            _ = close_requested(&mut commands) => Exit::Closed(None),
        };

        match exit {
            Exit::Failed(fault) => self.sink.emit(TransportEvent::Failed(fault)),
            Exit::Closed(reason) => self.sink.emit(TransportEvent::Closed { reason }),
        }
    }

    async fn drive(
        &self,
        ws: WsStream,
        commands: &mut mpsc::UnboundedReceiver<Command<SioOutbound>>,
    ) -> Exit {
        let (mut write, mut read) = ws.split();

        let handshake = tokio::select! {
            result = tokio::time::timeout(OPEN_TIMEOUT, read_open(&mut read)) => match result {
                Ok(Ok(handshake)) => handshake,
                Ok(Err(fault)) => return Exit::Failed(fault),
                Err(_) => {
                    return Exit::Failed(Fault::new(
                        ErrorKind::ConnectionFailed,
                        "timed out waiting for Engine.IO open packet",
                    ))
                }
            },
            _ = close_requested(commands) => return Exit::Closed(None),
        };
        debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Engine.IO open");

        if let Some(packet) = self
            .dialect
            .connect_packet(&self.namespace, self.token.as_deref())
        {
            if let Err(e) = write.send(Message::Text(packet.to_frame().into())).await {
                return Exit::Failed(classify_ws(&e, Phase::Handshake));
            }
        }

        let ping_interval = Duration::from_millis(handshake.ping_interval.max(MIN_PING_INTERVAL_MS));
        let liveness = ping_interval + Duration::from_millis(handshake.ping_timeout);
        let mut pinger: Option<Interval> = self.dialect.client_pings().then(|| {
            let mut interval = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        let mut deadline = Instant::now() + liveness;
        let mut joined = false;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send(SioOutbound::Emit { event, args, ack })) => {
                        let text = format_event(&event, args.first());
                        let packet = Packet::event(&self.namespace, &event, args, ack);
                        if let Err(e) = write.send(Message::Text(packet.to_frame().into())).await {
                            if is_fatal_ws(&e) {
                                return Exit::Closed(Some(e.to_string()));
                            }
                            self.sink.emit(TransportEvent::Error(emit_failure(event, text, &e)));
                        }
                    }
                    Some(Command::Close) | None => {
                        if joined {
                            let _ = write
                                .send(Message::Text(Packet::disconnect(&self.namespace).to_frame().into()))
                                .await;
                        }
                        let _ = write.send(Message::Close(None)).await;
                        drain(&mut read).await;
                        return Exit::Closed(None);
                    }
                },
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                        Some(Ok(Message::Binary(_))) => {
                            self.sink.emit(TransportEvent::Error(Fault::new(
                                ErrorKind::Transport,
                                PacketError::BinaryUnsupported.to_string(),
                            )));
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Exit::Closed(frame.map(|f| format!("closed by peer: {} {}", f.code, f.reason)));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) if is_fatal_ws(&e) => return Exit::Closed(Some(e.to_string())),
                        Some(Err(e)) => {
                            self.sink.emit(TransportEvent::Error(classify_ws(&e, Phase::Open)));
                            continue;
                        }
                        None => return Exit::Closed(Some("stream ended".to_string())),
                    };

                    deadline = Instant::now() + liveness;
                    match EnginePacket::decode(&text) {
                        Ok(EnginePacket::Ping(probe)) => {
                            let _ = write.send(Message::Text(EnginePacket::Pong(probe).encode().into())).await;
                        }
                        Ok(EnginePacket::Message(body)) => {
                            if let Some(exit) = self.on_packet(&body, &mut joined) {
                                return exit;
                            }
                        }
                        Ok(EnginePacket::Close) => {
                            return Exit::Closed(Some("engine closed by server".to_string()));
                        }
                        Ok(_) => {}
                        Err(e) => self.sink.emit(TransportEvent::Error(Fault::new(ErrorKind::Transport, e.to_string()))),
                    }
                },
                _ = tick(&mut pinger) => {
                    let _ = write.send(Message::Text(EnginePacket::Ping(None).encode().into())).await;
                },
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(namespace = %self.namespace, "Socket.IO heartbeat timed out");
                    return if joined {
                        Exit::Closed(Some("ping timeout".to_string()))
                    } else {
                        Exit::Failed(Fault::new(ErrorKind::ConnectionFailed, "ping timeout"))
                    };
                },
            }
        }
    }

    /// Handle one Socket.IO packet; `Some` ends the session
    fn on_packet(&self, body: &str, joined: &mut bool) -> Option<Exit> {
        let packet = match Packet::decode(body) {
            Ok(packet) => packet,
            Err(e) => {
                self.sink
                    .emit(TransportEvent::Error(Fault::new(ErrorKind::Transport, e.to_string())));
                return None;
            }
        };
        if packet.namespace != self.namespace {
            debug!(namespace = %packet.namespace, "Ignoring packet for other namespace");
            return None;
        }

        match packet.kind {
            PacketKind::Connect => {
                if !*joined {
                    *joined = true;
                    info!(namespace = %self.namespace, "Socket.IO namespace joined");
                    self.sink.emit(TransportEvent::Opened);
                }
            }
            PacketKind::ConnectError => {
                let detail = self.dialect.connect_error_detail(packet.data.as_ref());
                let fault = Fault::new(ErrorKind::ConnectionFailed, detail);
                if !*joined {
                    return Some(Exit::Failed(fault));
                }
                self.sink.emit(TransportEvent::Error(fault));
            }
            PacketKind::Disconnect => {
                return Some(Exit::Closed(Some("disconnected by server".to_string())));
            }
            PacketKind::Event => {
                if let Some((name, args)) = packet.event_parts() {
                    self.sink
                        .emit(TransportEvent::Received(SioInbound::Event { name, args }));
                }
            }
            PacketKind::Ack => {
                if let Some(id) = packet.id {
                    self.sink.emit(TransportEvent::Received(SioInbound::Ack {
                        id,
                        args: packet.ack_args(),
                    }));
                }
            }
            PacketKind::BinaryEvent | PacketKind::BinaryAck => {
                self.sink.emit(TransportEvent::Error(Fault::new(
                    ErrorKind::Transport,
                    PacketError::BinaryUnsupported.to_string(),
                )));
            }
        }
        None
    }
}

async fn read_open(read: &mut WsRead) -> Result<super::packet::Handshake, Fault> {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match EnginePacket::decode(text.as_str()) {
                Ok(EnginePacket::Open(handshake)) => return Ok(handshake),
                Ok(other) => debug!(?other, "Skipping packet before Engine.IO open"),
                Err(e) => return Err(Fault::new(ErrorKind::ConnectionFailed, e.to_string())),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(classify_ws(&e, Phase::Handshake)),
        }
    }
    Err(Fault::new(
        ErrorKind::ConnectionFailed,
        "connection closed before Engine.IO open packet",
    ))
}

async fn tick(pinger: &mut Option<Interval>) {
    match pinger {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn close_requested<O>(commands: &mut mpsc::UnboundedReceiver<Command<O>>) {
    while let Some(command) = commands.recv().await {
        if matches!(command, Command::Close) {
            return;
        }
    }
}

async fn drain(read: &mut WsRead) {
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        while let Some(frame) = read.next().await {
            if matches!(frame, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
    })
    .await;
}

/// Fault for an emit the socket refused; names the event and its rendered text
fn emit_failure(event: String, text: String, error: &WsError) -> Fault {
    Fault::new(ErrorKind::publish_error(Some(event), text), error.to_string())
}
