//! Subscription bookkeeping for topic-based protocols

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QosLevel {
    type Error = InvalidQos;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid QoS level {0}, expected 0, 1 or 2")]
pub struct InvalidQos(pub u8);

const PALETTE: [&str; 8] = [
    "#f58290", "#7c9df7", "#63c7a3", "#f5b971", "#b08cf5", "#64bfe0", "#e889c8", "#a4c96b",
];

/// Display color picked deterministically from the topic name
pub fn palette_color(name: &str) -> &'static str {
    let index = name
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    PALETTE[index % PALETTE.len()]
}

/// An acknowledged topic subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub name: String,
    #[serde(default)]
    pub qos: QosLevel,
    pub color: String,
}

impl Subscription {
    pub fn new<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        let color = palette_color(&name).to_string();
        Self {
            name,
            qos: QosLevel::default(),
            color,
        }
    }

    pub fn with_qos(mut self, qos: QosLevel) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_color<S: Into<String>>(mut self, color: S) -> Self {
        self.color = color.into();
        self
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (qos {})", self.name, u8::from(self.qos))
    }
}

#[derive(Default)]
struct Pending {
    subscribes: Vec<Subscription>,
    unsubscribes: Vec<String>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.subscribes.is_empty() && self.unsubscribes.is_empty()
    }
}

/// Active subscriptions plus in-flight subscribe/unsubscribe requests
///
/// The set is unique by name. `is_subscribing()` is true while any request
/// is waiting for its broker acknowledgement.
pub struct SubscriptionRegistry {
    active: watch::Sender<Vec<Subscription>>,
    subscribing: watch::Sender<bool>,
    pending: Mutex<Pending>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        let (active, _) = watch::channel(Vec::new());
        let (subscribing, _) = watch::channel(false);
        Self {
            active,
            subscribing,
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Record a subscribe request waiting for its ack
    pub fn begin_subscribe(&self, subscription: Subscription) {
        let mut pending = self.pending.lock();
        pending.subscribes.push(subscription);
        self.publish_flag(&pending);
    }

    /// Ack arrived: move the pending request into the active set
    pub fn complete_subscribe(&self, topic: &str) -> Option<Subscription> {
        let mut pending = self.pending.lock();
        let index = pending.subscribes.iter().position(|s| s.name == topic)?;
        let subscription = pending.subscribes.remove(index);

        self.active.send_modify(|active| {
            match active.iter_mut().find(|s| s.name == subscription.name) {
                Some(existing) => *existing = subscription.clone(),
                None => active.push(subscription.clone()),
            }
        });
        self.publish_flag(&pending);
        Some(subscription)
    }

    /// Subscribe failed; returns whether a matching request was pending
    pub fn abort_subscribe(&self, topic: &str) -> bool {
        let mut pending = self.pending.lock();
        let found = match pending.subscribes.iter().position(|s| s.name == topic) {
            Some(index) => {
                pending.subscribes.remove(index);
                true
            }
            None => false,
        };
        self.publish_flag(&pending);
        found
    }

    pub fn begin_unsubscribe<S: Into<String>>(&self, topic: S) {
        let mut pending = self.pending.lock();
        pending.unsubscribes.push(topic.into());
        self.publish_flag(&pending);
    }

    /// Ack arrived: drop the topic from the active set
    pub fn complete_unsubscribe(&self, topic: &str) -> bool {
        let mut pending = self.pending.lock();
        let found = match pending.unsubscribes.iter().position(|t| t == topic) {
            Some(index) => {
                pending.unsubscribes.remove(index);
                true
            }
            None => false,
        };
        if found {
            self.active.send_if_modified(|active| {
                let before = active.len();
                active.retain(|s| s.name != topic);
                active.len() != before
            });
        }
        self.publish_flag(&pending);
        found
    }

    pub fn abort_unsubscribe(&self, topic: &str) -> bool {
        let mut pending = self.pending.lock();
        let found = match pending.unsubscribes.iter().position(|t| t == topic) {
            Some(index) => {
                pending.unsubscribes.remove(index);
                true
            }
            None => false,
        };
        self.publish_flag(&pending);
        found
    }

    /// Forget every subscription and pending request
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        *pending = Pending::default();
        self.active.send_if_modified(|active| {
            let changed = !active.is_empty();
            active.clear();
            changed
        });
        self.publish_flag(&pending);
    }

    pub fn snapshot(&self) -> Vec<Subscription> {
        self.active.borrow().clone()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.active.borrow().iter().any(|s| s.name == topic)
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Subscription>> {
        self.active.subscribe()
    }

    pub fn is_subscribing(&self) -> bool {
        *self.subscribing.borrow()
    }

    pub fn watch_subscribing(&self) -> watch::Receiver<bool> {
        self.subscribing.subscribe()
    }

    fn publish_flag(&self, pending: &Pending) {
        let busy = !pending.is_empty();
        self.subscribing.send_if_modified(|flag| {
            let changed = *flag != busy;
            *flag = busy;
            changed
        });
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_conversion() {
        assert_eq!(QosLevel::try_from(0), Ok(QosLevel::AtMostOnce));
        assert_eq!(QosLevel::try_from(2), Ok(QosLevel::ExactlyOnce));
        assert_eq!(QosLevel::try_from(3), Err(InvalidQos(3)));
        assert_eq!(u8::from(QosLevel::AtLeastOnce), 1);
    }

    #[test]
    fn test_qos_serde_as_number() {
        let sub = Subscription::new("a/b").with_qos(QosLevel::AtLeastOnce);
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["qos"], 1);

        let bad = serde_json::from_str::<Subscription>(r##"{"name":"x","qos":7,"color":"#fff"}"##);
        assert!(bad.is_err());
    }

    #[test]
    fn test_palette_color_is_stable() {
        assert_eq!(palette_color("sensors/temp"), palette_color("sensors/temp"));
        assert!(palette_color("").starts_with('#'));
        assert_eq!(Subscription::new("x").with_color("red").color, "red");
    }

    #[test]
    fn test_subscribe_ack_adds_subscription() {
        let registry = SubscriptionRegistry::new();
        registry.begin_subscribe(Subscription::new("a/b"));
        assert!(registry.is_subscribing());
        assert!(registry.snapshot().is_empty());

        let added = registry.complete_subscribe("a/b");
        assert!(added.is_some());
        assert!(!registry.is_subscribing());
        assert!(registry.contains("a/b"));
    }

    #[test]
    fn test_subscribe_is_unique_by_name() {
        let registry = SubscriptionRegistry::new();
        registry.begin_subscribe(Subscription::new("a/b"));
        registry.complete_subscribe("a/b");
        registry.begin_subscribe(Subscription::new("a/b").with_qos(QosLevel::ExactlyOnce));
        registry.complete_subscribe("a/b");

        let active = registry.snapshot();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].qos, QosLevel::ExactlyOnce);
    }

    #[test]
    fn test_abort_subscribe_clears_flag() {
        let registry = SubscriptionRegistry::new();
        registry.begin_subscribe(Subscription::new("a/b"));
        assert!(registry.abort_subscribe("a/b"));
        assert!(!registry.is_subscribing());
        assert!(registry.snapshot().is_empty());
        assert!(!registry.abort_subscribe("a/b"));
    }

    #[test]
    fn test_subscribe_then_unsubscribe_leaves_empty_set() {
        let registry = SubscriptionRegistry::new();
        registry.begin_subscribe(Subscription::new("a/b"));
        registry.complete_subscribe("a/b");
        registry.begin_unsubscribe("a/b");
        assert!(registry.is_subscribing());
        assert!(registry.complete_unsubscribe("a/b"));

        assert!(registry.snapshot().is_empty());
        assert!(!registry.is_subscribing());
    }

    #[test]
    fn test_flag_stays_set_while_any_request_pending() {
        let registry = SubscriptionRegistry::new();
        registry.begin_subscribe(Subscription::new("one"));
        registry.begin_subscribe(Subscription::new("two"));
        registry.complete_subscribe("one");
        assert!(registry.is_subscribing());
        registry.complete_subscribe("two");
        assert!(!registry.is_subscribing());
    }

    #[test]
    fn test_clear_drops_everything() {
        let registry = SubscriptionRegistry::new();
        registry.begin_subscribe(Subscription::new("one"));
        registry.complete_subscribe("one");
        registry.begin_subscribe(Subscription::new("two"));

        registry.clear();
        assert!(registry.snapshot().is_empty());
        assert!(!registry.is_subscribing());
        assert!(registry.complete_subscribe("two").is_none());
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let registry = SubscriptionRegistry::new();
        let mut rx = registry.watch();

        registry.begin_subscribe(Subscription::new("a"));
        registry.complete_subscribe("a");

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }
}
