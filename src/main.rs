//! realtime-client - connect, script a few operations and stream the journal
//!
//! Journal events are printed to stdout as JSON lines; logs go to stderr.

use clap::{Args, Parser, Subcommand};
use realtime_session::config::RealtimeConfig;
use realtime_session::observability::init_default_logging;
use realtime_session::{
    ClientVersion, ConnectionState, Journal, MqttConfig, MqttConnection, SocketIoConfig,
    SocketIoConnection, Subscription, WebSocketConfig, WebSocketConnection,
};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Realtime connection client for WebSocket, Socket.IO and MQTT
#[derive(Parser)]
#[command(name = "realtime-client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a WebSocket endpoint
    Ws(WsArgs),
    /// Connect to a Socket.IO server
    Sio(SioArgs),
    /// Connect to an MQTT broker
    Mqtt(MqttArgs),
    /// Validate the configuration file
    Config {
        /// Print the parsed configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Args)]
struct WsArgs {
    /// ws:// or wss:// URL; defaults to [websocket].url
    url: Option<String>,
    /// Sub-protocol to offer (repeatable)
    #[arg(long = "protocol")]
    protocols: Vec<String>,
    /// Text frame to send once connected (repeatable)
    #[arg(long = "send")]
    messages: Vec<String>,
}

#[derive(Args)]
struct SioArgs {
    /// Server URL; the path selects the namespace
    url: Option<String>,
    /// Client protocol version: v2, v3 or v4
    #[arg(long = "client-version")]
    version: Option<ClientVersion>,
    /// Engine.IO mount path
    #[arg(long)]
    path: Option<String>,
    /// Bearer token
    #[arg(long, env = "REALTIME_SIO_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// `event=json` to emit once connected (repeatable)
    #[arg(long = "emit")]
    emits: Vec<String>,
}

#[derive(Args)]
struct MqttArgs {
    /// Broker URL: ws, wss, mqtt or mqtts
    url: Option<String>,
    #[arg(long, env = "REALTIME_MQTT_USERNAME")]
    username: Option<String>,
    #[arg(long, env = "REALTIME_MQTT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Topic filter to subscribe to once connected (repeatable)
    #[arg(long = "subscribe")]
    topics: Vec<String>,
    /// `topic=message` to publish once connected (repeatable)
    #[arg(long = "publish")]
    publishes: Vec<String>,
    /// Journal unsubscribe acknowledgements
    #[arg(long)]
    journal_unsubscribe: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Ws(args) => run_websocket(&config, args).await,
        Commands::Sio(args) => run_socketio(&config, args).await,
        Commands::Mqtt(args) => run_mqtt(&config, args).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(path: &Option<PathBuf>) -> CliResult<RealtimeConfig> {
    let path = match path {
        Some(path) => Some(path.clone()),
        None => RealtimeConfig::discover(),
    };
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(RealtimeConfig::load_from_file(&path)?)
        }
        None => Ok(RealtimeConfig::default()),
    }
}

fn handle_config_command(config: &RealtimeConfig, show: bool) -> CliResult<()> {
    config.validate()?;
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Configuration valid");
    }
    Ok(())
}

fn require_url(cli: Option<String>, section: Option<&str>, name: &str) -> CliResult<String> {
    cli.or_else(|| section.map(str::to_string))
        .ok_or_else(|| format!("no URL given and no [{name}] section configured").into())
}

async fn run_websocket(config: &RealtimeConfig, args: WsArgs) -> CliResult<()> {
    let section = config.websocket.as_ref();
    let url = require_url(args.url, section.map(|s| s.url.as_str()), "websocket")?;
    let protocols = if args.protocols.is_empty() {
        section.map(|s| s.active_protocols()).unwrap_or_default()
    } else {
        args.protocols
    };

    let connection = WebSocketConnection::with_capacity(config.journal.channel_capacity);
    connection.connect(&WebSocketConfig::new(url).with_protocols(protocols))?;

    let messages = args.messages;
    stream_session(
        connection.journal(),
        connection.watch_state(),
        || messages.iter().for_each(|m| connection.send(m.as_str())),
        || connection.disconnect(),
    )
    .await
}

async fn run_socketio(config: &RealtimeConfig, args: SioArgs) -> CliResult<()> {
    let mut sio_config = match (&args.url, &config.socketio) {
        (None, Some(section)) => section.to_config()?,
        (Some(url), Some(section)) => SocketIoConfig {
            url: url.clone(),
            ..section.to_config()?
        },
        (Some(url), None) => SocketIoConfig::new(url.clone()),
        (None, None) => return Err("no URL given and no [socketio] section configured".into()),
    };
    if let Some(version) = args.version {
        sio_config.version = version;
    }
    if let Some(path) = args.path {
        sio_config.path = path;
    }
    if let Some(token) = args.token {
        sio_config.bearer_token = Some(token);
    }

    let emits = args
        .emits
        .iter()
        .map(|arg| parse_emit(arg))
        .collect::<CliResult<Vec<_>>>()?;

    let connection = SocketIoConnection::with_capacity(config.journal.channel_capacity);
    connection.connect(&sio_config)?;

    stream_session(
        connection.journal(),
        connection.watch_state(),
        || {
            for (event, payload) in emits {
                connection.send(event, payload);
            }
        },
        || connection.disconnect(),
    )
    .await
}

async fn run_mqtt(config: &RealtimeConfig, args: MqttArgs) -> CliResult<()> {
    let section = config.mqtt.as_ref();
    let mut mqtt_config = match (&args.url, section) {
        (None, Some(section)) => section.to_config()?,
        (Some(url), Some(section)) => MqttConfig {
            url: url.clone(),
            ..section.to_config()?
        },
        (Some(url), None) => MqttConfig::new(url.clone()),
        (None, None) => return Err("no URL given and no [mqtt] section configured".into()),
    };
    if let Some(username) = args.username {
        mqtt_config.username = username;
    }
    if let Some(password) = args.password {
        mqtt_config.password = password;
    }

    let publishes = args
        .publishes
        .iter()
        .map(|arg| parse_publish(arg))
        .collect::<CliResult<Vec<_>>>()?;

    let connection = MqttConnection::with_capacity(config.journal.channel_capacity);
    connection.set_journal_unsubscribe(
        args.journal_unsubscribe || section.is_some_and(|s| s.journal_unsubscribe),
    );
    connection.connect(&mqtt_config)?;

    let topics = args.topics;
    stream_session(
        connection.journal(),
        connection.watch_state(),
        || {
            for topic in topics {
                connection.subscribe(Subscription::new(topic));
            }
            for (topic, message) in publishes {
                connection.publish(topic, message);
            }
        },
        || connection.disconnect(),
    )
    .await
}

/// `event=json`; a payload that is not JSON is sent as a string
fn parse_emit(arg: &str) -> CliResult<(String, Value)> {
    let (event, payload) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected event=json, got `{arg}`"))?;
    let payload =
        serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string()));
    Ok((event.to_string(), payload))
}

fn parse_publish(arg: &str) -> CliResult<(String, String)> {
    let (topic, message) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected topic=message, got `{arg}`"))?;
    Ok((topic.to_string(), message.to_string()))
}

/// Print journal events until the connection ends or Ctrl-C
///
/// `script` runs once, the first time the connection reaches `CONNECTED`.
async fn stream_session<P, S, D>(
    journal: Arc<Journal<P>>,
    mut state: watch::Receiver<ConnectionState>,
    script: S,
    disconnect: D,
) -> CliResult<()>
where
    P: Serialize + Clone,
    S: FnOnce(),
    D: FnOnce(),
{
    let (history, mut live) = journal.subscribe_with_history();
    let mut printed = history.last().map(|e| e.seq);
    for event in &history {
        println!("{}", serde_json::to_string(event)?);
    }

    let mut script = Some(script);
    loop {
        let current = *state.borrow_and_update();
        match current {
            ConnectionState::Connected => {
                if let Some(script) = script.take() {
                    script();
                }
            }
            ConnectionState::Disconnected => break,
            ConnectionState::Connecting => {}
        }

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                disconnect();
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            event = live.recv() => match event {
                Ok(event) => {
                    if printed.map_or(true, |seq| event.seq > seq) {
                        printed = Some(event.seq);
                        println!("{}", serde_json::to_string(&event)?);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Journal reader lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    // Flush whatever was journaled on the way out.
    let tail = match printed {
        Some(seq) => journal.since(seq),
        None => journal.snapshot(),
    };
    for event in tail {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
