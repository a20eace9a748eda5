//! Wire format of the realtime connection.
//!
//! Client → server control messages are `{"action": ..., "topic": ...}`.
//! Server → client messages carry a `type` tag and, for data events, a
//! `data` payload. Data events that arrive without a `topic` are routed by
//! the topic their type is broadcast on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Ping,
}

impl ClientMessage {
    /// The JSON text frame sent to the server.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Greeting sent by the server when the socket opens
    Connection,
    /// Acknowledgement of a subscribe/unsubscribe
    Subscription,
    Pong,
    SensorData,
    Alert,
    Production,
    Other(String),
}

impl EventKind {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "connection" => EventKind::Connection,
            "subscription" => EventKind::Subscription,
            "pong" => EventKind::Pong,
            "sensor_data" => EventKind::SensorData,
            "alert" => EventKind::Alert,
            "production" => EventKind::Production,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// Protocol bookkeeping that is never handed to consumers.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            EventKind::Connection | EventKind::Subscription | EventKind::Pong
        )
    }

    /// Topic the server broadcasts this kind of event on.
    fn default_topic(&self) -> Option<&'static str> {
        match self {
            EventKind::SensorData => Some("sensors"),
            EventKind::Alert => Some("alerts"),
            EventKind::Production => Some("production"),
            _ => None,
        }
    }
}

/// One inbound message from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub kind: EventKind,
    pub topic: Option<String>,
    pub status: Option<String>,
    pub data: Value,
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct RawServerMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<String>,
}

impl ServerEvent {
    /// Parse a text frame. Anything that isn't a `type`-tagged JSON object is `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let raw: RawServerMessage = serde_json::from_str(text).ok()?;
        let kind = EventKind::from_tag(&raw.kind);
        let topic = raw
            .topic
            .or_else(|| kind.default_topic().map(str::to_string));
        Some(Self {
            kind,
            topic,
            status: raw.status,
            data: raw.data,
            timestamp: raw.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_encode_control_messages() {
        let sub: Value = serde_json::from_str(
            &ClientMessage::Subscribe { topic: "alerts".to_string() }.encode().unwrap(),
        )
        .unwrap();
        assert_eq!(sub, json!({"action": "subscribe", "topic": "alerts"}));

        let ping: Value = serde_json::from_str(&ClientMessage::Ping.encode().unwrap()).unwrap();
        assert_eq!(ping, json!({"action": "ping"}));

        // Encoded form parses back through the serde representation
        let unsub = ClientMessage::Unsubscribe { topic: "sensors".to_string() };
        assert_eq!(serde_json::from_str::<ClientMessage>(&unsub.encode().unwrap()).unwrap(), unsub);
    }

    #[test]
    fn test_parse_data_event_infers_topic() {
        let event = ServerEvent::parse(
            r#"{"type":"alert","data":{"title":"Overpressure"},"timestamp":"2024-05-01T10:00:00.123456"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::Alert);
        assert_eq!(event.topic.as_deref(), Some("alerts"));
        assert_eq!(event.data["title"], "Overpressure");
        assert!(!event.kind.is_control());
    }

    #[test]
    fn test_explicit_topic_wins() {
        let event = ServerEvent::parse(r#"{"type":"sensor_data","topic":"rig-7","data":{}}"#).unwrap();
        assert_eq!(event.topic.as_deref(), Some("rig-7"));
    }

    #[test]
    fn test_parse_control_and_unknown() {
        let pong = ServerEvent::parse(r#"{"type":"pong","timestamp":"t"}"#).unwrap();
        assert!(pong.kind.is_control());

        let ack = ServerEvent::parse(r#"{"type":"subscription","status":"subscribed","topic":"alerts"}"#).unwrap();
        assert_eq!(ack.kind, EventKind::Subscription);
        assert_eq!(ack.status.as_deref(), Some("subscribed"));

        let custom = ServerEvent::parse(r#"{"type":"maintenance","topic":"ops"}"#).unwrap();
        assert_eq!(custom.kind, EventKind::Other("maintenance".to_string()));
        assert_eq!(custom.data, Value::Null);
    }

    #[test]
    fn test_malformed_messages() {
        assert!(ServerEvent::parse("not json").is_none());
        assert!(ServerEvent::parse(r#"{"topic":"alerts"}"#).is_none());
        assert!(ServerEvent::parse(r#"[1,2,3]"#).is_none());
        assert!(ServerEvent::parse(r#"{"type":42}"#).is_none());
    }
}
