//! WebSocket transport over tokio-tungstenite

use super::{command_channel, runtime, Command, Connector, EventSink, TransportEvent, TransportHandle};
use crate::classify::{classify_ws, is_fatal_ws, Phase};
use crate::error::{ErrorKind, Fault, TransportError};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn, Instrument};
use url::Url;

/// Time allowed for the peer to answer our close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Everything needed to open one WebSocket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    pub url: String,
    /// Sub-protocols offered in the handshake
    pub protocols: Vec<String>,
}

impl WebSocketConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            protocols: Vec::new(),
        }
    }

    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }
}

/// Check that `url` is a usable WebSocket endpoint (pure function)
pub fn validate_endpoint(url: &str) -> Result<Url, TransportError> {
    let parsed = Url::parse(url.trim()).map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::UnsupportedScheme {
                protocol: "websocket",
                scheme: other.to_string(),
            })
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(TransportError::InvalidEndpoint(format!("{url}: missing host")));
    }
    Ok(parsed)
}

/// Build the upgrade request with the offered sub-protocols
pub(crate) fn build_request(url: &Url, protocols: &[String]) -> Result<Request<()>, TransportError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

    let offered: Vec<&str> = protocols
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if !offered.is_empty() {
        let value = HeaderValue::from_str(&offered.join(", "))
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }
    Ok(request)
}

/// Production connector for plain WebSocket sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    type Config = WebSocketConfig;
    type Inbound = String;
    type Outbound = String;

    fn open(
        &self,
        config: &WebSocketConfig,
        sink: EventSink<String>,
    ) -> Result<Box<dyn TransportHandle<String>>, TransportError> {
        let url = validate_endpoint(&config.url)?;
        let request = build_request(&url, &config.protocols)?;
        let runtime = runtime()?;

        let (handle, commands) = command_channel();
        let span = crate::transport_span!(protocol = "websocket", host = url.host_str().unwrap_or_default());
        runtime.spawn(run(request, sink, commands).instrument(span));
        Ok(Box::new(handle))
    }
}

async fn run(
    request: Request<()>,
    sink: EventSink<String>,
    mut commands: mpsc::UnboundedReceiver<Command<String>>,
) {
    let target = request.uri().to_string();
    debug!(url = %target, "Opening WebSocket");

    let ws = tokio::select! {
        result = tokio_tungstenite::connect_async(request) => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(url = %target, error = %e, "WebSocket handshake failed");
                sink.emit(TransportEvent::Failed(classify_ws(&e, Phase::Handshake)));
                return;
            }
        },
        _ = wait_for_close(&mut commands) => {
            sink.emit(TransportEvent::Closed { reason: None });
            return;
        }
    };

    info!(url = %target, "WebSocket open");
    sink.emit(TransportEvent::Opened);
    let reason = pump(ws, &sink, &mut commands).await;
    sink.emit(TransportEvent::Closed { reason });
}

/// Resolve once a close is requested or every handle is gone
async fn wait_for_close<O>(commands: &mut mpsc::UnboundedReceiver<Command<O>>) {
    while let Some(command) = commands.recv().await {
        if matches!(command, Command::Close) {
            return;
        }
    }
}

async fn pump(
    ws: WsStream,
    sink: &EventSink<String>,
    commands: &mut mpsc::UnboundedReceiver<Command<String>>,
) -> Option<String> {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text.clone().into())).await {
                        sink.emit(TransportEvent::Error(Fault::new(
                            ErrorKind::publish_error(None, text),
                            e.to_string(),
                        )));
                        if is_fatal_ws(&e) {
                            return Some(e.to_string());
                        }
                    }
                }
                Some(Command::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    drain(&mut read).await;
                    return None;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    sink.emit(TransportEvent::Received(text.as_str().to_string()));
                }
                Some(Ok(Message::Binary(data))) => {
                    sink.emit(TransportEvent::Received(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Peer closed WebSocket");
                    return frame.map(|f| format!("closed by peer: {} {}", f.code, f.reason));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) if is_fatal_ws(&e) => return Some(e.to_string()),
                Some(Err(e)) => {
                    sink.emit(TransportEvent::Error(classify_ws(&e, Phase::Open)));
                }
                None => return Some("stream ended".to_string()),
            },
        }
    }
}

async fn drain(read: &mut futures_util::stream::SplitStream<WsStream>) {
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        while let Some(frame) = read.next().await {
            if matches!(frame, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
    })
    .await;
}

impl From<&crate::config::WebSocketSection> for WebSocketConfig {
    fn from(section: &crate::config::WebSocketSection) -> Self {
        WebSocketConfig::new(section.url.clone()).with_protocols(section.active_protocols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_ws_and_wss() {
        assert!(validate_endpoint("ws://localhost:8080").is_ok());
        assert!(validate_endpoint("wss://echo.example.com/socket").is_ok());
        assert!(validate_endpoint("  wss://echo.example.com  ").is_ok());
    }

    #[test]
    fn test_validate_rejects_other_schemes() {
        assert!(matches!(
            validate_endpoint("http://localhost"),
            Err(TransportError::UnsupportedScheme { scheme, .. }) if scheme == "http"
        ));
        assert!(matches!(
            validate_endpoint("not a url"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_build_request_offers_protocols() {
        let url = validate_endpoint("ws://localhost:9000/chat").unwrap();
        let request = build_request(&url, &["graphql-ws".into(), " ".into(), "chat".into()]).unwrap();
        assert_eq!(
            request.headers().get("Sec-WebSocket-Protocol").unwrap(),
            "graphql-ws, chat"
        );
    }

    #[test]
    fn test_build_request_without_protocols() {
        let url = validate_endpoint("ws://localhost:9000").unwrap();
        let request = build_request(&url, &[]).unwrap();
        assert!(request.headers().get("Sec-WebSocket-Protocol").is_none());
    }

    #[test]
    fn test_open_without_runtime_fails() {
        let sink = EventSink::new(|_| {});
        let result = TungsteniteConnector.open(&WebSocketConfig::new("ws://localhost:1"), sink);
        assert!(matches!(result, Err(TransportError::NoRuntime)));
    }

    #[test]
    fn test_open_with_bad_scheme_fails_before_runtime_check() {
        let sink = EventSink::new(|_| {});
        let result = TungsteniteConnector.open(&WebSocketConfig::new("ftp://localhost"), sink);
        assert!(matches!(result, Err(TransportError::UnsupportedScheme { .. })));
    }
}
