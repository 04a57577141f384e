use crate::{Direction, GameClock, Npc, Player, Season, WorldObject};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

fn default_true() -> bool {
    true
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope has an empty type")]
    EmptyType,
    #[error("invalid payload for {kind}: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Every frame on the socket, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Envelope {
    /// Stamps the envelope with the current time.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Some(now_timestamp()),
        }
    }

    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.kind.is_empty() {
            return Err(DecodeError::EmptyType);
        }
        Ok(envelope)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Typed payload of a single inbound event kind.
pub trait EventPayload: Sized {
    const KIND: EventKind;

    fn from_event(event: &ServerEvent) -> Option<&Self>;
}

macro_rules! server_events {
    ($($variant:ident => $wire:literal : $payload:ty),* $(,)?) => {
        /// Inbound event types understood by the client.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventKind {
            $($variant),*
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant),*];

            pub fn from_wire(kind: &str) -> Option<Self> {
                match kind {
                    $($wire => Some(EventKind::$variant),)*
                    _ => None,
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventKind::$variant => $wire),*
                }
            }
        }

        impl std::fmt::Display for EventKind {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        #[derive(Debug, Clone, PartialEq)]
        pub enum ServerEvent {
            $($variant($payload)),*
        }

        impl ServerEvent {
            pub fn kind(&self) -> EventKind {
                match self {
                    $(ServerEvent::$variant(_) => EventKind::$variant),*
                }
            }

            /// Decodes `data` as the payload of `kind`. A null payload reads as `{}`.
            pub fn decode_as(kind: EventKind, data: Value) -> Result<Self, DecodeError> {
                let data = if data.is_null() { Value::Object(Map::new()) } else { data };
                match kind {
                    $(EventKind::$variant => decode_payload::<$payload>($wire, data).map(ServerEvent::$variant)),*
                }
            }
        }

        $(
            impl EventPayload for $payload {
                const KIND: EventKind = EventKind::$variant;

                fn from_event(event: &ServerEvent) -> Option<&Self> {
                    match event {
                        ServerEvent::$variant(payload) => Some(payload),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*
    };
}

fn decode_payload<T: DeserializeOwned>(kind: &'static str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::Payload { kind, source })
}

server_events! {
    PlayerPosition => "player_position_update": PlayerPositionUpdate,
    PlayerLeft => "player_left": PlayerLeft,
    WorldObjectUpdate => "world_object_update": WorldObjectUpdate,
    NpcPosition => "npc_position_update": NpcPositionUpdate,
    TimeUpdate => "time_update": GameClock,
    SeasonChange => "season_change": SeasonChange,
    InteractionResult => "interaction_result": InteractionResult,
    QuestUpdate => "quest_update": QuestUpdate,
    FriendRequest => "friend_request": FriendRequest,
    AchievementUnlocked => "achievement_unlocked": AchievementUnlocked,
    LevelUp => "level_up": LevelUp,
    UserStatus => "user_status": UserStatus,
    DmMessage => "dm_message": DmMessage,
    GuildInvitation => "guild_invitation": GuildInvitation,
    Notification => "notification": InboxNotification,
    WorldSnapshot => "world_snapshot": WorldSnapshot,
    Pong => "pong": Pong,
}

impl ServerEvent {
    /// `Ok(None)` for types this client does not know.
    pub fn decode(envelope: &Envelope) -> Result<Option<Self>, DecodeError> {
        let Some(kind) = EventKind::from_wire(&envelope.kind) else {
            return Ok(None);
        };
        Self::decode_as(kind, envelope.data.clone()).map(Some)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPositionUpdate {
    pub player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub pos_x: i32,
    pub pos_y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_moving: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLeft {
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldObjectUpdate {
    pub object_id: String,
    #[serde(default)]
    pub changes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcPositionUpdate {
    pub npc_id: String,
    pub pos_x: i32,
    pub pos_y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonChange {
    pub season: Season,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestUpdateKind {
    Started,
    Completed,
    #[default]
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestUpdate {
    #[serde(default)]
    pub quest_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: QuestUpdateKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub username: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementUnlocked {
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelUp {
    pub new_level: u32,
    #[serde(default)]
    pub new_exp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friend {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatus {
    #[serde(default)]
    pub online_friends: Vec<Friend>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmMessage {
    pub from: String,
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildInvitation {
    pub guild_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Persistent inbox entry pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxNotification {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Authoritative zone state, sent in answer to a resync request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub npcs: Vec<Npc>,
    #[serde(default)]
    pub objects: Vec<WorldObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<GameClock>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pong {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Object,
    Npc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMove {
    pub pos_x: i32,
    pub pos_y: i32,
    pub direction: Direction,
    pub is_moving: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInteract {
    pub target_id: String,
    pub target_type: TargetKind,
    pub pos_x: i32,
    pub pos_y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncRequest {
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

/// Outbound messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientIntent {
    Move(PlayerMove),
    Interact(PlayerInteract),
    Resync(ResyncRequest),
    Ping,
}

impl ClientIntent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientIntent::Move(_) => "player_move",
            ClientIntent::Interact(_) => "player_interact",
            ClientIntent::Resync(_) => "resync_request",
            ClientIntent::Ping => "ping",
        }
    }

    pub fn data(&self) -> Result<Value, serde_json::Error> {
        match self {
            ClientIntent::Move(intent) => serde_json::to_value(intent),
            ClientIntent::Interact(intent) => serde_json::to_value(intent),
            ClientIntent::Resync(intent) => serde_json::to_value(intent),
            ClientIntent::Ping => Ok(Value::Object(Map::new())),
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        Ok(Envelope::new(self.kind(), self.data()?))
    }

    /// Reads an outbound envelope back, for peers and tests.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, DecodeError> {
        let data = envelope.data.clone();
        let intent = match envelope.kind.as_str() {
            "player_move" => ClientIntent::Move(decode_payload("player_move", data)?),
            "player_interact" => ClientIntent::Interact(decode_payload("player_interact", data)?),
            "resync_request" => ClientIntent::Resync(decode_payload("resync_request", data)?),
            "ping" => ClientIntent::Ping,
            _ => return Ok(None),
        };
        Ok(Some(intent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Position, WorldObjectKind};
    use serde_json::json;

    #[test]
    fn test_envelope_parse_rejects_garbage() {
        assert!(matches!(
            Envelope::parse("not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Envelope::parse(r#"{"type":"","data":{}}"#),
            Err(DecodeError::EmptyType)
        ));
    }

    #[test]
    fn test_envelope_new_is_timestamped() {
        let envelope = Envelope::new("ping", json!({}));
        let timestamp = envelope.timestamp.expect("timestamp");
        assert!(chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok());
    }

    #[test]
    fn test_unknown_event_type_decodes_to_none() {
        let envelope = Envelope::parse(r#"{"type":"weather_update","data":{}}"#).unwrap();
        assert!(ServerEvent::decode(&envelope).unwrap().is_none());
    }

    #[test]
    fn test_null_data_reads_as_empty_object() {
        let envelope = Envelope::parse(r#"{"type":"pong","data":null}"#).unwrap();
        let event = ServerEvent::decode(&envelope).unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::Pong);
    }

    #[test]
    fn test_player_position_update_decodes() {
        let envelope = Envelope::parse(
            r#"{"type":"player_position_update","data":{"player_id":"p2","pos_x":3,"pos_y":4,"direction":"left"}}"#,
        )
        .unwrap();

        let event = ServerEvent::decode(&envelope).unwrap().unwrap();
        let update = PlayerPositionUpdate::from_event(&event).unwrap();
        assert_eq!(update.player_id, "p2");
        assert_eq!((update.pos_x, update.pos_y), (3, 4));
        assert_eq!(update.direction, Some(Direction::Left));
        assert_eq!(update.is_moving, None);
    }

    #[test]
    fn test_malformed_payload_names_its_kind() {
        let envelope = Envelope::parse(r#"{"type":"level_up","data":{"new_level":"ten"}}"#).unwrap();
        match ServerEvent::decode(&envelope) {
            Err(DecodeError::Payload { kind, .. }) => assert_eq!(kind, "level_up"),
            other => panic!("expected payload error, got {other:?}"),
        }
    }

    #[test]
    fn test_event_kind_wire_names_are_unique() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(*kind));
        }
    }

    #[test]
    fn test_flattened_extras_are_kept() {
        let event = ServerEvent::decode_as(
            EventKind::FriendRequest,
            json!({"username": "bob", "request_id": 7}),
        )
        .unwrap();
        let request = FriendRequest::from_event(&event).unwrap();
        assert_eq!(request.username, "bob");
        assert_eq!(request.extra["request_id"], json!(7));
    }

    #[test]
    fn test_world_snapshot_decodes_partial_lists() {
        let event = ServerEvent::decode_as(
            EventKind::WorldSnapshot,
            json!({"players": [{"id": "p2", "username": "Ada", "position": {"x": 1, "y": 2}}]}),
        )
        .unwrap();
        let snapshot = WorldSnapshot::from_event(&event).unwrap();
        assert_eq!(snapshot.players[0].position, Position::new(1, 2));
        assert!(snapshot.npcs.is_empty());
        assert!(snapshot.time.is_none());
    }

    #[test]
    fn test_world_snapshot_survives_new_object_types() {
        let event = ServerEvent::decode_as(
            EventKind::WorldSnapshot,
            json!({"objects": [
                {"id": "1", "type": "chest", "position": {"x": 3, "y": 3}},
                {"id": "2", "type": "fountain", "position": {"x": 4, "y": 3}}
            ]}),
        )
        .unwrap();
        let snapshot = WorldSnapshot::from_event(&event).unwrap();
        assert_eq!(snapshot.objects.len(), 2);
        assert_eq!(snapshot.objects[1].kind, WorldObjectKind::Unknown);
    }

    #[test]
    fn test_intent_wire_shape() {
        let intent = ClientIntent::Interact(PlayerInteract {
            target_id: "1".into(),
            target_type: TargetKind::Npc,
            pos_x: 20,
            pos_y: 11,
        });
        let envelope = intent.to_envelope().unwrap();
        assert_eq!(envelope.kind, "player_interact");
        assert_eq!(
            envelope.data,
            json!({"target_id": "1", "target_type": "npc", "pos_x": 20, "pos_y": 11})
        );

        let text = envelope.to_json().unwrap();
        let back = ClientIntent::from_envelope(&Envelope::parse(&text).unwrap()).unwrap();
        assert_eq!(back, Some(intent));
    }

    #[test]
    fn test_ping_has_empty_object_payload() {
        assert_eq!(ClientIntent::Ping.data().unwrap(), json!({}));
    }
}
