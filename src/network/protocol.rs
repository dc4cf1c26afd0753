//! Protocol Messages
//!
//! Wire format for peer-to-peer traffic. Every message travels inside an
//! [`Envelope`] carrying the sender's tick and the clock fields the
//! receiver needs for round-trip estimation. Serialized as JSON:
//!
//! ```text
//! { "type": "RawCoords", "tick": 812, "t1": 5012.5, "t2": 5040.0,
//!   "tSend": 5061.25, "id": "ship-2", "x": 120.0, "y": 88.5 }
//! ```

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use crate::core::rng::SeedBundle;

// =============================================================================
// ENVELOPE
// =============================================================================

/// A message plus the timing fields stamped by the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender's local tick when the message was sent.
    pub tick: u64,
    /// `tSend` of the last envelope the sender received from us (our clock).
    pub t1: Option<f64>,
    /// When the sender received that envelope (sender's clock).
    pub t2: Option<f64>,
    /// When the sender sent this envelope (sender's clock).
    #[serde(rename = "tSend")]
    pub t_send: f64,
    /// Kind-specific payload, flattened next to the timing fields.
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Kind of the carried message.
    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize from JSON string, classifying failures.
    ///
    /// A missing or non-string `type` is [`ProtocolError::Malformed`]; a
    /// `type` naming no known kind is [`ProtocolError::UnknownKind`].
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing `type`".to_string()))?;

        if MessageKind::from_name(kind).is_none() {
            return Err(ProtocolError::UnknownKind(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Every message kind exchanged between the two peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Handshake probe carrying the shared RNG seeds.
    Syn(SynPayload),

    /// Reply to a probe.
    SynAck,

    /// Handshake complete; receiver starts its simulation.
    Ack,

    /// Heartbeat.
    Ping,

    /// Heartbeat reply.
    Pong,

    /// Position (and velocity or scroll) of a remotely driven entity.
    RawCoords(RawCoords),

    /// Command issued to an entity by the remote player.
    RemoteOrder(RemoteOrder),

    /// User-facing notification.
    Notification(Notification),

    /// Entity created on the remote simulation.
    AddObject(AddObject),

    /// Method call on an entity.
    GameEvent(GameEvent),

    /// Chat line.
    Chat(Chat),
}

impl Message {
    /// Kind tag of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Syn(_) => MessageKind::Syn,
            Message::SynAck => MessageKind::SynAck,
            Message::Ack => MessageKind::Ack,
            Message::Ping => MessageKind::Ping,
            Message::Pong => MessageKind::Pong,
            Message::RawCoords(_) => MessageKind::RawCoords,
            Message::RemoteOrder(_) => MessageKind::RemoteOrder,
            Message::Notification(_) => MessageKind::Notification,
            Message::AddObject(_) => MessageKind::AddObject,
            Message::GameEvent(_) => MessageKind::GameEvent,
            Message::Chat(_) => MessageKind::Chat,
        }
    }

    /// Shorthand for [`MessageKind::is_immediate`].
    pub fn is_immediate(&self) -> bool {
        self.kind().is_immediate()
    }
}

/// Payload-free message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    /// See [`Message::Syn`].
    Syn,
    /// See [`Message::SynAck`].
    SynAck,
    /// See [`Message::Ack`].
    Ack,
    /// See [`Message::Ping`].
    Ping,
    /// See [`Message::Pong`].
    Pong,
    /// See [`Message::RawCoords`].
    RawCoords,
    /// See [`Message::RemoteOrder`].
    RemoteOrder,
    /// See [`Message::Notification`].
    Notification,
    /// See [`Message::AddObject`].
    AddObject,
    /// See [`Message::GameEvent`].
    GameEvent,
    /// See [`Message::Chat`].
    Chat,
}

impl MessageKind {
    /// All kinds, in wire-name order.
    pub const ALL: [MessageKind; 11] = [
        MessageKind::Syn,
        MessageKind::SynAck,
        MessageKind::Ack,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::RawCoords,
        MessageKind::RemoteOrder,
        MessageKind::Notification,
        MessageKind::AddObject,
        MessageKind::GameEvent,
        MessageKind::Chat,
    ];

    /// Wire name (`type` field).
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Syn => "Syn",
            MessageKind::SynAck => "SynAck",
            MessageKind::Ack => "Ack",
            MessageKind::Ping => "Ping",
            MessageKind::Pong => "Pong",
            MessageKind::RawCoords => "RawCoords",
            MessageKind::RemoteOrder => "RemoteOrder",
            MessageKind::Notification => "Notification",
            MessageKind::AddObject => "AddObject",
            MessageKind::GameEvent => "GameEvent",
            MessageKind::Chat => "Chat",
        }
    }

    /// Look up a kind by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Handled on arrival instead of going through the receive queue.
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            MessageKind::Syn
                | MessageKind::SynAck
                | MessageKind::Ack
                | MessageKind::Ping
                | MessageKind::Pong
        )
    }
}

/// Seeds carried by every `Syn` probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynPayload {
    /// Main simulation seed.
    pub seed: u64,
    /// Per-stream seeds.
    #[serde(default)]
    pub seeds: Vec<u64>,
}

impl From<&SeedBundle> for SynPayload {
    fn from(bundle: &SeedBundle) -> Self {
        Self {
            seed: bundle.seed,
            seeds: bundle.seeds.clone(),
        }
    }
}

impl From<&SynPayload> for SeedBundle {
    fn from(payload: &SynPayload) -> Self {
        SeedBundle::new(payload.seed, payload.seeds.clone())
    }
}

/// Raw coordinates of a remotely driven entity.
///
/// CPU-driven entities also carry `vX`/`vY`; human-driven ones carry the
/// viewport `scrollLeft` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCoords {
    /// Entity id.
    pub id: String,
    /// X position, if known.
    pub x: Option<f64>,
    /// Y position, if known.
    pub y: Option<f64>,
    /// X velocity (CPU-driven).
    #[serde(rename = "vX", default, skip_serializing_if = "Option::is_none")]
    pub v_x: Option<f64>,
    /// Y velocity (CPU-driven).
    #[serde(rename = "vY", default, skip_serializing_if = "Option::is_none")]
    pub v_y: Option<f64>,
    /// Viewport scroll offset (human-driven).
    #[serde(rename = "scrollLeft", default, skip_serializing_if = "Option::is_none")]
    pub scroll_left: Option<f64>,
}

impl RawCoords {
    /// Position-only update.
    pub fn position(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            x: Some(x),
            y: Some(y),
            v_x: None,
            v_y: None,
            scroll_left: None,
        }
    }
}

/// Order issued by the remote player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrder {
    /// Order name (`"build"`, `"target"`, ...).
    #[serde(rename = "orderType")]
    pub order_type: String,
    /// Order-specific options.
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Entity receiving the order.
    pub id: String,
}

/// User-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Rendered markup.
    pub html: String,
    /// Category (`"info"`, `"warning"`, ...).
    #[serde(rename = "notificationType")]
    pub notification_type: String,
}

/// Entity created on the remote simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddObject {
    /// Factory type name.
    #[serde(rename = "objectType")]
    pub object_type: String,
    /// Construction parameters.
    #[serde(default)]
    pub params: SpawnParams,
}

/// Construction parameters of an [`AddObject`].
///
/// `parent` and `target` are entity ids that the receiver resolves to its
/// own live objects. Unrecognized keys are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnParams {
    /// Id of the new entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Id of the entity that created it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Id of the entity it is aimed at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// X position at send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    /// Y position at send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// X velocity at send time.
    #[serde(rename = "vX", default, skip_serializing_if = "Option::is_none")]
    pub v_x: Option<f64>,
    /// Y velocity at send time.
    #[serde(rename = "vY", default, skip_serializing_if = "Option::is_none")]
    pub v_y: Option<f64>,
    /// Launch offset from the parent, X.
    #[serde(rename = "offsetX", default, skip_serializing_if = "Option::is_none")]
    pub offset_x: Option<f64>,
    /// Launch offset from the parent, Y.
    #[serde(rename = "offsetY", default, skip_serializing_if = "Option::is_none")]
    pub offset_y: Option<f64>,
    /// Speed towards the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Any other parameters.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Method call on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GameEventWire", into = "GameEventWire")]
pub struct GameEvent {
    /// Entity id.
    pub id: String,
    /// Method name.
    pub method: String,
    /// Arguments.
    pub args: EventArgs,
}

impl GameEvent {
    /// Build an event.
    pub fn new(id: impl Into<String>, method: impl Into<String>, args: EventArgs) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            args,
        }
    }
}

/// Arguments of a [`GameEvent`], decided when the event is built or decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum EventArgs {
    /// No arguments.
    Unit,
    /// One scalar (`value: 3`).
    Scalar(Scalar),
    /// Positional scalars (`value: [1, "a"]`).
    ScalarList(Vec<Scalar>),
    /// Named parameters (`params: {...}`).
    Params(Map<String, Value>),
}

/// JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// String.
    Text(String),
}

impl Scalar {
    /// Numeric value, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// On-the-wire shape of [`GameEvent`]: `value` xor `params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GameEventWire {
    id: String,
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<ScalarOrList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ScalarOrList {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl From<GameEventWire> for GameEvent {
    fn from(wire: GameEventWire) -> Self {
        let args = match (wire.value, wire.params) {
            (Some(ScalarOrList::One(s)), _) => EventArgs::Scalar(s),
            (Some(ScalarOrList::Many(list)), _) => EventArgs::ScalarList(list),
            (None, Some(params)) => EventArgs::Params(params),
            (None, None) => EventArgs::Unit,
        };
        Self {
            id: wire.id,
            method: wire.method,
            args,
        }
    }
}

impl From<GameEvent> for GameEventWire {
    fn from(event: GameEvent) -> Self {
        let (value, params) = match event.args {
            EventArgs::Unit => (None, None),
            EventArgs::Scalar(s) => (Some(ScalarOrList::One(s)), None),
            EventArgs::ScalarList(list) => (Some(ScalarOrList::Many(list)), None),
            EventArgs::Params(params) => (None, Some(params)),
        };
        Self {
            id: event.id,
            method: event.method,
            value,
            params,
        }
    }
}

/// Chat line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// Text as typed.
    pub text: String,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Codec errors. All of them are recovered by dropping the message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, missing `type`, or payload of the wrong shape.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// `type` names no known kind.
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    /// Serialization failed.
    #[error("Encode failed: {0}")]
    Encode(String),
}
