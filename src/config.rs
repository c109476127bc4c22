//! TOML configuration for the realtime client
//!
//! Every section is optional; a file may describe one protocol or all three.
//! Credentials can be inline or named through `*_env` fields, which are
//! resolved when a transport config is built rather than at load time.

use crate::session::journal::DEFAULT_CHANNEL_CAPACITY;
use crate::transport::mqtt::connection::{
    parse_broker_url, MqttConfig, DEFAULT_CLIENT_ID_PREFIX,
};
use crate::transport::socketio::{dialect_for, resolve_endpoint, ClientVersion, SocketIoConfig};
use crate::transport::websocket::validate_endpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Files probed by [`RealtimeConfig::discover`], in order
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["realtime.toml", "config/realtime.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RealtimeConfig {
    pub websocket: Option<WebSocketSection>,
    pub socketio: Option<SocketIoSection>,
    pub mqtt: Option<MqttSection>,
    #[serde(default)]
    pub journal: JournalSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSocketSection {
    pub url: String,
    #[serde(default)]
    pub protocols: Vec<ProtocolEntry>,
}

/// Sub-protocol offered during the handshake while `active`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolEntry {
    pub value: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl WebSocketSection {
    /// Active, non-empty protocol values in declaration order
    pub fn active_protocols(&self) -> Vec<String> {
        self.protocols
            .iter()
            .filter(|p| p.active)
            .map(|p| p.value.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketIoSection {
    pub url: String,
    #[serde(default = "default_socketio_path")]
    pub path: String,
    #[serde(default)]
    pub client_version: ClientVersion,
    #[serde(default)]
    pub auth: SocketIoAuth,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    None,
    Bearer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SocketIoAuth {
    #[serde(default, rename = "type")]
    pub kind: AuthKind,
    #[serde(default = "default_true")]
    pub active: bool,
    pub token: Option<String>,
    /// Environment variable holding the token; wins over `token`
    pub token_env: Option<String>,
}

impl SocketIoSection {
    /// Build the transport config, resolving the token from the environment
    pub fn to_config(&self) -> Result<SocketIoConfig, ConfigError> {
        let mut config = SocketIoConfig::new(self.url.clone())
            .with_path(self.path.clone())
            .with_version(self.client_version);

        if self.auth.kind == AuthKind::Bearer && self.auth.active {
            let token = match &self.auth.token_env {
                Some(name) => Some(required_env(name)?),
                None => self.auth.token.clone(),
            };
            if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
                config = config.with_bearer_token(token);
            }
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL: `ws`, `wss`, `mqtt` or `mqtts`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Journal `UNSUBSCRIBED` when the broker acknowledges an unsubscribe
    #[serde(default)]
    pub journal_unsubscribe: bool,
}

impl MqttSection {
    /// Build the transport config, resolving credentials from the environment
    pub fn to_config(&self) -> Result<MqttConfig, ConfigError> {
        let username = resolve_credential(self.username.as_ref(), self.username_env.as_deref())?;
        let password = resolve_credential(self.password.as_ref(), self.password_env.as_deref())?;

        let mut config = MqttConfig::new(self.url.clone())
            .with_credentials(username, password)
            .with_client_id_prefix(self.client_id_prefix.clone());
        config.keep_alive = Duration::from_secs(self.keep_alive_secs.max(1));
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalSection {
    /// Buffer of the live event channel per connection
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for JournalSection {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_socketio_path() -> String {
    crate::transport::socketio::client::DEFAULT_PATH.to_string()
}

fn default_client_id_prefix() -> String {
    DEFAULT_CLIENT_ID_PREFIX.to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid URL in [{section}]: {reason}")]
    InvalidUrl {
        section: &'static str,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RealtimeConfig {
    /// Load and validate a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RealtimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// First existing file among [`DEFAULT_CONFIG_PATHS`]
    pub fn discover() -> Option<PathBuf> {
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.is_file())
    }

    /// Check every URL and scheme without touching the network
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ws) = &self.websocket {
            validate_endpoint(&ws.url).map_err(|e| invalid_url("websocket", e))?;
        }
        if let Some(sio) = &self.socketio {
            let probe = SocketIoConfig::new(sio.url.clone()).with_path(sio.path.clone());
            let dialect = dialect_for(sio.client_version);
            resolve_endpoint(&probe, dialect.as_ref()).map_err(|e| invalid_url("socketio", e))?;
        }
        if let Some(mqtt) = &self.mqtt {
            parse_broker_url(&mqtt.url).map_err(|e| invalid_url("mqtt", e))?;
        }
        if self.journal.channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "journal.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid_url(section: &'static str, error: crate::error::TransportError) -> ConfigError {
    ConfigError::InvalidUrl {
        section,
        reason: error.to_string(),
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.to_string()))
}

/// A named environment variable wins over the inline value
fn resolve_credential(inline: Option<&String>, env_name: Option<&str>) -> Result<String, ConfigError> {
    match env_name {
        Some(name) => required_env(name),
        None => Ok(inline.cloned().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
[websocket]
url = "wss://echo.example.com/socket"
protocols = [
    { value = "graphql-ws" },
    { value = "chat", active = false },
    { value = "  " },
]

[socketio]
url = "https://chat.example.com/admin"
client_version = "v2"

[socketio.auth]
type = "bearer"
token = "abc"

[mqtt]
url = "wss://broker.example.com:8884/mqtt"
username = "user"
journal_unsubscribe = true

[journal]
channel_capacity = 32
"#;

    #[test]
    fn test_full_config() {
        let config = RealtimeConfig::from_toml_str(FULL).unwrap();

        let ws = config.websocket.as_ref().unwrap();
        assert_eq!(ws.active_protocols(), vec!["graphql-ws".to_string()]);

        let sio = config.socketio.as_ref().unwrap();
        assert_eq!(sio.path, "/socket.io");
        assert_eq!(sio.client_version, ClientVersion::V2);
        let sio_config = sio.to_config().unwrap();
        assert_eq!(sio_config.bearer_token.as_deref(), Some("abc"));

        let mqtt = config.mqtt.as_ref().unwrap();
        assert!(mqtt.journal_unsubscribe);
        assert_eq!(mqtt.keep_alive_secs, 60);
        let mqtt_config = mqtt.to_config().unwrap();
        assert_eq!(mqtt_config.username, "user");
        assert_eq!(mqtt_config.password, "");
        assert_eq!(mqtt_config.client_id_prefix, "realtime");

        assert_eq!(config.journal.channel_capacity, 32);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = RealtimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RealtimeConfig::default());
        assert_eq!(config.journal.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_rejects_bad_schemes() {
        let err = RealtimeConfig::from_toml_str("[websocket]\nurl = \"http://x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { section: "websocket", .. }));

        let err = RealtimeConfig::from_toml_str("[mqtt]\nurl = \"ftp://x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { section: "mqtt", .. }));

        let err = RealtimeConfig::from_toml_str("[socketio]\nurl = \"mqtt://x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { section: "socketio", .. }));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RealtimeConfig::from_toml_str("[journal]\nchannel_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn test_inactive_bearer_not_applied() {
        let sio: SocketIoSection = toml::from_str(
            r#"
url = "http://localhost:3000"
[auth]
type = "bearer"
active = false
token = "abc"
"#,
        )
        .unwrap();
        assert_eq!(sio.to_config().unwrap().bearer_token, None);
    }

    #[test]
    fn test_missing_env_var_is_reported() {
        let mqtt: MqttSection = toml::from_str(
            r#"
url = "mqtt://localhost"
username_env = "REALTIME_TEST_SURELY_UNSET_USERNAME"
"#,
        )
        .unwrap();
        assert!(matches!(
            mqtt.to_config(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "REALTIME_TEST_SURELY_UNSET_USERNAME"
        ));
    }

    #[test]
    fn test_env_var_overrides_inline() {
        std::env::set_var("REALTIME_TEST_MQTT_PASSWORD", "from-env");
        let mqtt: MqttSection = toml::from_str(
            r#"
url = "mqtt://localhost"
password = "inline"
password_env = "REALTIME_TEST_MQTT_PASSWORD"
keep_alive_secs = 15
"#,
        )
        .unwrap();
        let config = mqtt.to_config().unwrap();
        assert_eq!(config.password, "from-env");
        assert_eq!(config.keep_alive, Duration::from_secs(15));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{FULL}").unwrap();
        let config = RealtimeConfig::load_from_file(file.path()).unwrap();
        assert!(config.websocket.is_some());
        assert!(config.mqtt.is_some());
    }

    #[test]
    fn test_load_missing_file() {
        let result = RealtimeConfig::load_from_file(Path::new("/nonexistent/realtime.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            RealtimeConfig::from_toml_str("[mqtt\nurl ="),
            Err(ConfigError::TomlParse(_))
        ));
    }
}
