//! Wire protocol shared by clients and the server
//!
//! Every message is a JSON envelope `{"event": <name>, "data": <payload>}`.
//! Event names are part of the client contract and must not change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one live client connection
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Allocate a fresh random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client supplied session key
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Passkey(pub String);

impl Passkey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Passkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Passkey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Payload of a `join-room` request
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    #[serde(default)]
    pub passkey: Option<String>,
    #[serde(default)]
    pub player_name: String,
    #[serde(default)]
    pub opponent_name: String,
}

/// Events sent from a client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(JoinRoom),
    /// Opaque negotiation payload, relayed verbatim
    Signal(Value),
}

impl FromStr for ClientEvent {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// Payload of a `room-joined` confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub is_host: bool,
    pub room_id: String,
}

/// Events sent from the server to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    RoomJoined(RoomJoined),
    /// The session now holds two participants
    PlayerJoined,
    Signal(Value),
    Error(String),
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_uses_camel_case_fields() {
        let event: ClientEvent = r#"{"event":"join-room","data":{"passkey":"ABC123","playerName":"Alice","opponentName":"Bob"}}"#
            .parse()
            .unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom(JoinRoom {
                passkey: Some("ABC123".into()),
                player_name: "Alice".into(),
                opponent_name: "Bob".into(),
            })
        );
    }

    #[test]
    fn join_room_tolerates_missing_fields() {
        let event: ClientEvent = r#"{"event":"join-room","data":{}}"#.parse().unwrap();
        assert_eq!(event, ClientEvent::JoinRoom(JoinRoom::default()));
    }

    #[test]
    fn signal_payload_is_kept_verbatim() {
        let raw = r#"{"event":"signal","data":{"type":"offer","sdp":"v=0","extra":[1,2,3]}}"#;
        let ClientEvent::Signal(payload) = raw.parse::<ClientEvent>().unwrap() else {
            panic!("expected signal");
        };
        assert_eq!(payload, json!({"type": "offer", "sdp": "v=0", "extra": [1, 2, 3]}));
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!("{\"event\":\"leave-room\",\"data\":{}}".parse::<ClientEvent>().is_err());
    }

    #[test]
    fn server_events_match_wire_names() {
        let joined = ServerEvent::RoomJoined(RoomJoined {
            is_host: true,
            room_id: "ABC123".into(),
        });
        assert_eq!(
            serde_json::to_value(&joined).unwrap(),
            json!({"event": "room-joined", "data": {"isHost": true, "roomId": "ABC123"}})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::PlayerJoined).unwrap(),
            json!({"event": "player-joined"})
        );
        assert_eq!(
            ServerEvent::Error("Room is full".into()).to_string(),
            r#"{"event":"error","data":"Room is full"}"#
        );
    }
}
