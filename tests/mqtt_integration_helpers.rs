//! MQTT broker test helpers
//!
//! Broker tests are `#[ignore]`d and expect a broker at localhost:1883
//! unless `REALTIME_TEST_BROKER_URL` points elsewhere.

#![allow(dead_code)]

use realtime_session::{ConnectionState, MqttConfig, MqttConnection};
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const MQTT_BROKER_URL: &str = "mqtt://localhost:1883";

pub fn broker_url() -> String {
    std::env::var("REALTIME_TEST_BROKER_URL").unwrap_or_else(|_| MQTT_BROKER_URL.to_string())
}

pub fn mqtt_config() -> MqttConfig {
    MqttConfig::new(broker_url()).with_client_id_prefix("realtime_test_")
}

/// Topic that no other test run publishes to
pub fn unique_topic(name: &str) -> String {
    format!("realtime-session/test/{name}/{}", uuid::Uuid::new_v4().simple())
}

/// Poll `condition` for up to ten seconds
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(25)).await;
    }
    condition()
}

pub async fn connected_client() -> MqttConnection {
    let connection = MqttConnection::new();
    connection.connect(&mqtt_config()).unwrap();
    assert!(
        eventually(|| connection.state() == ConnectionState::Connected).await,
        "broker at {} unreachable: {:?}",
        broker_url(),
        connection.journal().kinds()
    );
    connection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_topics_differ() {
        assert_ne!(unique_topic("a"), unique_topic("a"));
        assert!(unique_topic("echo").starts_with("realtime-session/test/echo/"));
    }
}
