//! Pure routing of rumqttc events and ack correlation

use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode, UnsubAckReason};
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// Broker accepted the session
    ConnAck,
    /// Message on a subscribed topic
    Message { topic: String, message: String },
    /// Subscribe request left the client with this packet id
    SubscribeSent(u16),
    UnsubscribeSent(u16),
    SubAck { pkid: u16, success: bool },
    UnsubAck { pkid: u16, success: bool },
    /// Broker sent DISCONNECT
    Disconnected { reason: String },
    /// Pings, publish acks and other plumbing
    Other,
}

/// Route an MQTT event (pure function)
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(_) => EventRoute::ConnAck,
            Packet::Publish(publish) => EventRoute::Message {
                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                message: String::from_utf8_lossy(&publish.payload).into_owned(),
            },
            Packet::SubAck(suback) => EventRoute::SubAck {
                pkid: suback.pkid,
                success: suback
                    .return_codes
                    .iter()
                    .all(|code| matches!(code, SubscribeReasonCode::Success(_))),
            },
            Packet::UnsubAck(unsuback) => EventRoute::UnsubAck {
                pkid: unsuback.pkid,
                success: unsuback
                    .reasons
                    .iter()
                    .all(|reason| matches!(reason, UnsubAckReason::Success)),
            },
            Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                reason: format!("{:?}", disconnect.reason_code),
            },
            _ => EventRoute::Other,
        },
        Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeSent(*pkid),
        Event::Outgoing(Outgoing::Unsubscribe(pkid)) => EventRoute::UnsubscribeSent(*pkid),
        Event::Outgoing(_) => EventRoute::Other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Subscribe,
    Unsubscribe,
}

/// Correlates broker acks with the topics that requested them
///
/// Requests are queued in submission order; rumqttc assigns packet ids in the
/// same order when it writes them out.
#[derive(Debug, Default)]
pub struct AckTracker {
    queued: VecDeque<(AckKind, String)>,
    in_flight: HashMap<u16, (AckKind, String)>,
}

impl AckTracker {
    pub fn queue<S: Into<String>>(&mut self, kind: AckKind, topic: S) {
        self.queued.push_back((kind, topic.into()));
    }

    /// Outgoing packet observed; bind its id to the oldest queued request
    pub fn sent(&mut self, kind: AckKind, pkid: u16) {
        match self.queued.iter().position(|(k, _)| *k == kind) {
            Some(index) => {
                if let Some(request) = self.queued.remove(index) {
                    self.in_flight.insert(pkid, request);
                }
            }
            None => debug!(pkid, ?kind, "Outgoing packet without queued request"),
        }
    }

    /// Ack received; returns the topic it belongs to
    pub fn acknowledged(&mut self, kind: AckKind, pkid: u16) -> Option<String> {
        match self.in_flight.get(&pkid) {
            Some((k, _)) if *k == kind => self.in_flight.remove(&pkid).map(|(_, topic)| topic),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{Publish, SubAck, UnsubAck};
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_publish() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Bytes::from("sensors/temp"),
            pkid: 0,
            payload: Bytes::from("21.5"),
            properties: None,
        };
        let route = route_mqtt_event(&Event::Incoming(Packet::Publish(publish)));
        assert_eq!(
            route,
            EventRoute::Message {
                topic: "sensors/temp".into(),
                message: "21.5".into()
            }
        );
    }

    #[test]
    fn test_route_suback_success_and_failure() {
        let ok = SubAck {
            pkid: 4,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtMostOnce)],
            properties: None,
        };
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::SubAck(ok))),
            EventRoute::SubAck {
                pkid: 4,
                success: true
            }
        );

        let denied = SubAck {
            pkid: 5,
            return_codes: vec![SubscribeReasonCode::NotAuthorized],
            properties: None,
        };
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::SubAck(denied))),
            EventRoute::SubAck {
                pkid: 5,
                success: false
            }
        );
    }

    #[test]
    fn test_route_unsuback() {
        let ack = UnsubAck {
            pkid: 9,
            reasons: vec![UnsubAckReason::Success],
            properties: None,
        };
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::UnsubAck(ack))),
            EventRoute::UnsubAck {
                pkid: 9,
                success: true
            }
        );
    }

    #[test]
    fn test_route_outgoing_ids() {
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::Subscribe(3))),
            EventRoute::SubscribeSent(3)
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::Unsubscribe(8))),
            EventRoute::UnsubscribeSent(8)
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::Other
        );
    }

    #[test]
    fn test_tracker_correlates_in_order() {
        let mut tracker = AckTracker::default();
        tracker.queue(AckKind::Subscribe, "a");
        tracker.queue(AckKind::Unsubscribe, "b");
        tracker.queue(AckKind::Subscribe, "c");

        tracker.sent(AckKind::Subscribe, 1);
        tracker.sent(AckKind::Unsubscribe, 2);
        tracker.sent(AckKind::Subscribe, 3);

        assert_eq!(tracker.acknowledged(AckKind::Subscribe, 3), Some("c".into()));
        assert_eq!(tracker.acknowledged(AckKind::Unsubscribe, 2), Some("b".into()));
        assert_eq!(tracker.acknowledged(AckKind::Subscribe, 1), Some("a".into()));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_tracker_ignores_mismatched_acks() {
        let mut tracker = AckTracker::default();
        tracker.queue(AckKind::Subscribe, "a");
        tracker.sent(AckKind::Subscribe, 1);

        assert_eq!(tracker.acknowledged(AckKind::Unsubscribe, 1), None);
        assert_eq!(tracker.acknowledged(AckKind::Subscribe, 2), None);
        assert_eq!(tracker.acknowledged(AckKind::Subscribe, 1), Some("a".into()));
    }
}
