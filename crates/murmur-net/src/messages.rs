//! Wire protocol: JSON objects tagged by a `"type"` field.
//!
//! Inbound frames decode into [`ServerMessage`] with [`decode_server_message`];
//! outbound [`Command`]s encode with [`Command::encode`]. Every payload field
//! sits next to the tag in the same object, camelCase.
//!
//! ```text
//! {"type":"state","tick":12,"timestampMs":1000,"nearEntities":[...],...}
//! ```

use glam::Vec3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Identifier of a participant, as assigned by the client at join.
pub type PlayerId = String;

// ---------------------------------------------------------------------------
// Position encoding
// ---------------------------------------------------------------------------

/// Positions travel as `{ "x": .., "y": .., "z": .. }` objects.
mod xyz {
    use glam::Vec3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Xyz {
        #[serde(default)]
        x: f32,
        #[serde(default)]
        y: f32,
        #[serde(default)]
        z: f32,
    }

    pub fn serialize<S: Serializer>(v: &Vec3, s: S) -> Result<S::Ok, S::Error> {
        Xyz {
            x: v.x,
            y: v.y,
            z: v.z,
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec3, D::Error> {
        let p = Xyz::deserialize(d)?;
        Ok(Vec3::new(p.x, p.y, p.z))
    }
}

// ---------------------------------------------------------------------------
// Entity samples
// ---------------------------------------------------------------------------

/// Near-tier sample: full pose plus every non-positional field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullEntitySample {
    /// Remote participant id.
    pub id: PlayerId,
    /// Display name, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// World position.
    #[serde(with = "xyz")]
    pub position: Vec3,
    /// Heading in radians.
    #[serde(default)]
    pub yaw: f32,
    /// Pitch in radians.
    #[serde(default)]
    pub pitch: f32,
    /// Heat meter.
    #[serde(default)]
    pub heat: f32,
    /// Wanted flag.
    #[serde(default)]
    pub wanted: bool,
    /// Opaque match/mode state label.
    #[serde(default)]
    pub match_state: String,
    /// Stunned flag.
    #[serde(default)]
    pub stunned: bool,
    /// Tagged flag (tag mode); absent means "unchanged".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagged: Option<bool>,
    /// Murmuration (flock) membership tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub murmuration_tag: Option<String>,
    /// Murmuration display color as `0xRRGGBB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub murmuration_color: Option<u32>,
}

/// Mid-tier sample: pose without pitch, plus the wanted flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReducedEntitySample {
    /// Remote participant id.
    pub id: PlayerId,
    /// Display name, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// World position.
    #[serde(with = "xyz")]
    pub position: Vec3,
    /// Heading in radians.
    #[serde(default)]
    pub yaw: f32,
    /// Wanted flag.
    #[serde(default)]
    pub wanted: bool,
    /// Tagged flag at reduced fidelity; absent means "unchanged".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagged: Option<bool>,
}

// ---------------------------------------------------------------------------
// Domain events
// ---------------------------------------------------------------------------

macro_rules! event_tags {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        /// Closed set of gameplay event tags the client relays.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventTag {
            $(
                #[doc = concat!("`", $wire, "`")]
                $variant,
            )+
        }

        impl EventTag {
            /// Every tag, in declaration order.
            pub const ALL: &'static [EventTag] = &[$(EventTag::$variant),+];

            /// Wire spelling of the tag.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(EventTag::$variant => $wire,)+
                }
            }

            /// Parse a wire tag. Returns `None` for tags outside the set.
            pub fn from_wire(tag: &str) -> Option<Self> {
                match tag {
                    $($wire => Some(EventTag::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

event_tags! {
    Chat => "chat",
    PlayerJoined => "player_joined",
    PvpHit => "pvp-hit",
    PvpStart => "pvp-start",
    PvpEnd => "pvp-end",
    PvpUpdate => "pvp-update",
    RaceStart => "race-start",
    RaceEnd => "race-end",
    RaceUpdate => "race-update",
    RaceCheckpoint => "race-checkpoint",
    TagStart => "tag-start",
    TagEnd => "tag-end",
    TagUpdate => "tag-update",
    TagTransfer => "tag-transfer",
    HeistStart => "heist-start",
    HeistEnd => "heist-end",
    HeistUpdate => "heist-update",
    HeistGrab => "heist-grab",
    HeistScore => "heist-score",
    TeamStart => "team-start",
    TeamEnd => "team-end",
    TeamUpdate => "team-update",
    TeamScore => "team-score",
    Stun => "stun",
}

impl std::fmt::Display for EventTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gameplay event with its payload left uninterpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    /// Routing tag.
    pub tag: EventTag,
    /// Every field of the wire object except `"type"`.
    pub payload: Map<String, Value>,
}

impl DomainEvent {
    /// Create an event from a tag and payload.
    pub fn new(tag: EventTag, payload: Map<String, Value>) -> Self {
        Self { tag, payload }
    }

    /// Deserialize the payload into a concrete type chosen by the consumer.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}

/// Deserializes a frame's event list, skipping tags outside [`EventTag`].
fn known_events<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<DomainEvent>, D::Error> {
    let raw: Vec<Map<String, Value>> = Vec::deserialize(d)?;
    Ok(raw
        .into_iter()
        .filter_map(|mut fields| {
            let tag = match fields.remove("type") {
                Some(Value::String(tag)) => tag,
                _ => return None,
            };
            match EventTag::from_wire(&tag) {
                Some(tag) => Some(DomainEvent::new(tag, fields)),
                None => {
                    tracing::trace!(tag = %tag, "skipping unknown event tag in frame");
                    None
                }
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Periodic interest-filtered world state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldStateFrame {
    /// Server tick that produced the frame.
    #[serde(default)]
    pub tick: u64,
    /// Server timestamp in milliseconds.
    #[serde(default)]
    pub timestamp_ms: i64,
    /// Entities close enough for full detail.
    #[serde(default)]
    pub near_entities: Vec<FullEntitySample>,
    /// Entities replicated at reduced detail.
    #[serde(default)]
    pub mid_entities: Vec<ReducedEntitySample>,
    /// Ids the server says left this observer's interest.
    #[serde(default)]
    pub removed_ids: Vec<PlayerId>,
    /// Gameplay events since the previous frame.
    #[serde(default, deserialize_with = "known_events")]
    pub events: Vec<DomainEvent>,
}

/// Full world snapshot carried by `welcome` for the initial load.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyWorldState {
    /// Every participant the server knows about.
    #[serde(default)]
    pub players: Vec<FullEntitySample>,
    /// Server timestamp of the snapshot, when present.
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
}

/// Handshake completion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Id the server registered for this client.
    pub player_id: PlayerId,
    /// Optional bootstrap snapshot.
    #[serde(default)]
    pub world_state: Option<LegacyWorldState>,
}

/// A participant left the world.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeft {
    /// The departing participant.
    pub player_id: PlayerId,
}

/// Server-reported error. Never fatal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerError {
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// Typed view of a `chat` event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender display name.
    pub username: String,
    /// Message text.
    pub message: String,
    /// Server timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `welcome`
    Welcome(Welcome),
    /// `state`
    State(WorldStateFrame),
    /// `player_left`
    PlayerLeft(PlayerLeft),
    /// `chat` and every mode lifecycle tag.
    Event(DomainEvent),
    /// `error`
    Error(ServerError),
    /// A tag this client does not understand.
    Unknown(String),
}

impl ServerMessage {
    /// Wire tag of the message.
    pub fn tag(&self) -> &str {
        match self {
            ServerMessage::Welcome(_) => "welcome",
            ServerMessage::State(_) => "state",
            ServerMessage::PlayerLeft(_) => "player_left",
            ServerMessage::Event(event) => event.tag.as_str(),
            ServerMessage::Error(_) => "error",
            ServerMessage::Unknown(tag) => tag,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

/// `join` payload, sent once right after the transport opens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCommand {
    /// Local player id.
    pub player_id: PlayerId,
    /// Local display name.
    pub username: String,
}

/// `update` payload: the local player's published state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionUpdate {
    /// World position.
    #[serde(with = "xyz")]
    pub position: Vec3,
    /// Heading in radians.
    pub yaw: f32,
    /// Pitch in radians.
    pub pitch: f32,
    /// Reported speed.
    pub speed: f32,
    /// Local timestamp in milliseconds.
    pub timestamp: i64,
}

/// Mode-specific command relayed without interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeCommand {
    /// Wire tag, e.g. `pvp-join` or `race_create`.
    pub tag: String,
    /// Fields placed next to the tag.
    pub payload: Map<String, Value>,
}

/// A client-to-server command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `join`
    Join(JoinCommand),
    /// `update`
    Update(PositionUpdate),
    /// `chat`
    Chat {
        /// Message text.
        message: String,
    },
    /// `leave`
    Leave,
    /// Any mode-defined tag.
    Mode(ModeCommand),
}

impl Command {
    /// Wire tag of the command.
    pub fn tag(&self) -> &str {
        match self {
            Command::Join(_) => "join",
            Command::Update(_) => "update",
            Command::Chat { .. } => "chat",
            Command::Leave => "leave",
            Command::Mode(mode) => &mode.tag,
        }
    }

    /// Convenience constructor for a mode command.
    pub fn mode(tag: impl Into<String>, payload: Map<String, Value>) -> Self {
        Command::Mode(ModeCommand {
            tag: tag.into(),
            payload,
        })
    }

    /// Encode to a JSON text frame.
    pub fn encode(&self) -> Result<String, MessageError> {
        let mut fields = match self {
            Command::Join(join) => to_object(join)?,
            Command::Update(update) => to_object(update)?,
            Command::Chat { message } => {
                let mut fields = Map::new();
                fields.insert("message".into(), Value::String(message.clone()));
                fields
            }
            Command::Leave => Map::new(),
            Command::Mode(mode) => mode.payload.clone(),
        };
        fields.insert("type".into(), Value::String(self.tag().to_string()));
        Ok(serde_json::to_string(&Value::Object(fields))?)
    }
}

fn to_object<T: Serialize>(body: &T) -> Result<Map<String, Value>, MessageError> {
    match serde_json::to_value(body)? {
        Value::Object(fields) => Ok(fields),
        _ => Err(MessageError::NotAnObject),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while encoding or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The text was not valid JSON or a payload did not match its tag.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The top-level value was not a JSON object.
    #[error("message is not a JSON object")]
    NotAnObject,

    /// The object had no string `"type"` field.
    #[error("message has no \"type\" tag")]
    MissingTag,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one inbound text frame.
///
/// Unknown tags decode successfully to [`ServerMessage::Unknown`]; only
/// malformed JSON or a known tag with a bad payload is an error.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, MessageError> {
    let Value::Object(mut fields) = serde_json::from_str::<Value>(text)? else {
        return Err(MessageError::NotAnObject);
    };
    let tag = match fields.remove("type") {
        Some(Value::String(tag)) => tag,
        _ => return Err(MessageError::MissingTag),
    };

    let msg = match tag.as_str() {
        "welcome" => ServerMessage::Welcome(from_fields(fields)?),
        "state" => ServerMessage::State(from_fields(fields)?),
        "player_left" => ServerMessage::PlayerLeft(from_fields(fields)?),
        "error" => ServerMessage::Error(from_fields(fields)?),
        other => match EventTag::from_wire(other) {
            Some(event_tag) => ServerMessage::Event(DomainEvent::new(event_tag, fields)),
            None => ServerMessage::Unknown(tag),
        },
    };
    Ok(msg)
}

fn from_fields<T: DeserializeOwned>(fields: Map<String, Value>) -> Result<T, MessageError> {
    Ok(serde_json::from_value(Value::Object(fields))?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
