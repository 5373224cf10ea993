//! Gateway frames and dispatch decoding.
//!
//! Every gateway message is a [`GatewayPayload`] envelope. Dispatch frames
//! (`op = 0`) carry an event name in `t`; [`GatewayEvent::decode`] turns the
//! ones the controller cares about into typed values and passes everything
//! else through as [`GatewayEvent::Other`].

use crate::error::{ProtocolError, Result};
use crate::event::ScheduledEvent;
use crate::guild::{Guild, UnavailableGuild};
use crate::interaction::Interaction;
use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// An event was dispatched.
    Dispatch,
    /// Heartbeat, either direction.
    Heartbeat,
    /// Start a new session.
    Identify,
    /// Resume a dropped session.
    Resume,
    /// The server asks the client to reconnect.
    Reconnect,
    /// The session is no longer valid.
    InvalidSession,
    /// First frame after connecting.
    Hello,
    /// The server acknowledged a heartbeat.
    HeartbeatAck,
}

impl OpCode {
    /// Numeric code on the wire.
    pub const fn code(self) -> u8 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self> {
        Ok(match raw {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            6 => Self::Resume,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => return Err(ProtocolError::UnknownOpCode(other)),
        })
    }
}

/// Gateway intents bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intents(u64);

impl Intents {
    /// Guild create/delete and channel events.
    pub const GUILDS: Self = Self(1 << 0);
    /// Scheduled event lifecycle and interest changes.
    pub const GUILD_SCHEDULED_EVENTS: Self = Self(1 << 16);

    /// Union of two sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Raw mask.
    pub const fn bits(self) -> u64 {
        self.0
    }
}

/// The gateway envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Opcode.
    pub op: u8,
    /// Payload body.
    #[serde(default)]
    pub d: Value,
    /// Sequence number, dispatch frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name, dispatch frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(ProtocolError::malformed("gateway payload"))
    }

    /// Typed opcode.
    pub fn opcode(&self) -> Result<OpCode> {
        OpCode::try_from(self.op)
    }

    /// Heartbeat frame carrying the last seen sequence.
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            op: OpCode::Heartbeat.code(),
            d: last_sequence.map_or(Value::Null, Value::from),
            s: None,
            t: None,
        }
    }

    /// Identify frame.
    pub fn identify(identify: &Identify) -> Self {
        Self {
            op: OpCode::Identify.code(),
            d: serde_json::to_value(identify).unwrap_or(Value::Null),
            s: None,
            t: None,
        }
    }

    /// Decode a Hello body.
    pub fn hello(&self) -> Result<Hello> {
        serde_json::from_value(self.d.clone()).map_err(ProtocolError::malformed("hello"))
    }

    /// Decode a dispatch frame into a typed event.
    pub fn event(&self) -> Result<GatewayEvent> {
        let name = self.t.as_deref().ok_or(ProtocolError::MissingEventName)?;
        GatewayEvent::decode(name, self.d.clone())
    }
}

/// Hello body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Hello {
    /// Milliseconds between heartbeats.
    pub heartbeat_interval: u64,
}

/// Identify body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identify {
    /// Bot token, without the `Bot ` prefix.
    pub token: String,
    /// Requested intents.
    pub intents: Intents,
    /// Client properties.
    pub properties: IdentifyProperties,
}

/// Client properties sent with Identify.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentifyProperties {
    /// Operating system.
    pub os: String,
    /// Library name.
    pub browser: String,
    /// Library name.
    pub device: String,
}

impl Identify {
    /// Identify for a bot token with the given intents.
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            properties: IdentifyProperties {
                os: std::env::consts::OS.to_string(),
                browser: "evchan".to_string(),
                device: "evchan".to_string(),
            },
        }
    }
}

/// Minimal user object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// User ID.
    pub id: Snowflake,
}

/// Minimal application object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRef {
    /// Application ID.
    pub id: Snowflake,
}

/// READY body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ready {
    /// The bot user.
    pub user: UserRef,
    /// The bot's application.
    pub application: ApplicationRef,
    /// Guilds the bot is in, all initially unavailable.
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    /// Session ID for resuming.
    #[serde(default)]
    pub session_id: String,
}

/// Body of GUILD_SCHEDULED_EVENT_USER_ADD / _REMOVE.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventUserChange {
    /// The event.
    pub guild_scheduled_event_id: Snowflake,
    /// The user whose interest changed.
    pub user_id: Snowflake,
    /// The guild.
    pub guild_id: Snowflake,
}

/// Dispatch events the controller understands.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Session established.
    Ready(Ready),
    /// A guild became available or the bot joined one.
    GuildCreate(Guild),
    /// A guild became unavailable or the bot left it.
    GuildDelete(UnavailableGuild),
    /// A scheduled event was created.
    ScheduledEventCreate(ScheduledEvent),
    /// A scheduled event changed (including status transitions).
    ScheduledEventUpdate(ScheduledEvent),
    /// A scheduled event was deleted.
    ScheduledEventDelete(ScheduledEvent),
    /// A user marked themselves interested.
    ScheduledEventUserAdd(EventUserChange),
    /// A user removed their interest.
    ScheduledEventUserRemove(EventUserChange),
    /// A command or component interaction.
    InteractionCreate(Box<Interaction>),
    /// Anything else, by name.
    Other(String),
}

impl GatewayEvent {
    /// Decode a dispatch body by event name.
    pub fn decode(name: &str, data: Value) -> Result<Self> {
        fn body<T: serde::de::DeserializeOwned>(what: &'static str, data: Value) -> Result<T> {
            serde_json::from_value(data).map_err(ProtocolError::malformed(what))
        }

        Ok(match name {
            "READY" => Self::Ready(body("READY", data)?),
            "GUILD_CREATE" => Self::GuildCreate(body("GUILD_CREATE", data)?),
            "GUILD_DELETE" => Self::GuildDelete(body("GUILD_DELETE", data)?),
            "GUILD_SCHEDULED_EVENT_CREATE" => {
                Self::ScheduledEventCreate(body("GUILD_SCHEDULED_EVENT_CREATE", data)?)
            }
            "GUILD_SCHEDULED_EVENT_UPDATE" => {
                Self::ScheduledEventUpdate(body("GUILD_SCHEDULED_EVENT_UPDATE", data)?)
            }
            "GUILD_SCHEDULED_EVENT_DELETE" => {
                Self::ScheduledEventDelete(body("GUILD_SCHEDULED_EVENT_DELETE", data)?)
            }
            "GUILD_SCHEDULED_EVENT_USER_ADD" => {
                Self::ScheduledEventUserAdd(body("GUILD_SCHEDULED_EVENT_USER_ADD", data)?)
            }
            "GUILD_SCHEDULED_EVENT_USER_REMOVE" => {
                Self::ScheduledEventUserRemove(body("GUILD_SCHEDULED_EVENT_USER_REMOVE", data)?)
            }
            "INTERACTION_CREATE" => {
                Self::InteractionCreate(Box::new(body("INTERACTION_CREATE", data)?))
            }
            other => Self::Other(other.to_string()),
        })
    }
}
