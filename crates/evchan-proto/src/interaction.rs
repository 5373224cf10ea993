//! Interactions (slash commands, message components) and their responses.

use crate::channel::ChannelKind;
use crate::gateway::UserRef;
use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Interaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum InteractionKind {
    /// Endpoint verification ping.
    Ping,
    /// A slash command.
    ApplicationCommand,
    /// A button press or select-menu choice.
    MessageComponent,
    /// Anything else (autocomplete, modals).
    Other(u8),
}

impl From<u8> for InteractionKind {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Self::Ping,
            2 => Self::ApplicationCommand,
            3 => Self::MessageComponent,
            other => Self::Other(other),
        }
    }
}

impl From<InteractionKind> for u8 {
    fn from(kind: InteractionKind) -> Self {
        match kind {
            InteractionKind::Ping => 1,
            InteractionKind::ApplicationCommand => 2,
            InteractionKind::MessageComponent => 3,
            InteractionKind::Other(raw) => raw,
        }
    }
}

/// Guild member wrapper around the invoking user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    /// The user.
    pub user: UserRef,
}

/// One supplied slash-command option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionValue {
    /// Option name.
    pub name: String,
    /// Option type code.
    #[serde(rename = "type")]
    pub kind: u8,
    /// Supplied value.
    #[serde(default)]
    pub value: Value,
}

/// Payload of a command or component interaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionData {
    /// Command name, command interactions only.
    #[serde(default)]
    pub name: Option<String>,
    /// Supplied options, command interactions only.
    #[serde(default)]
    pub options: Vec<OptionValue>,
    /// Component custom ID, component interactions only.
    #[serde(default)]
    pub custom_id: Option<String>,
    /// Component type, component interactions only.
    #[serde(default)]
    pub component_type: Option<u8>,
    /// Selected values, select menus only.
    #[serde(default)]
    pub values: Vec<String>,
}

/// An interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Interaction ID.
    pub id: Snowflake,
    /// Application the interaction is for.
    pub application_id: Snowflake,
    /// Interaction type.
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    /// Continuation token for responding.
    pub token: String,
    /// Guild the interaction came from.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Channel the interaction came from.
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    /// Invoking member, guild interactions.
    #[serde(default)]
    pub member: Option<MemberRef>,
    /// Invoking user, DM interactions.
    #[serde(default)]
    pub user: Option<UserRef>,
    /// Command or component data.
    #[serde(default)]
    pub data: Option<InteractionData>,
}

impl Interaction {
    /// Whoever triggered the interaction.
    pub fn invoker_id(&self) -> Option<Snowflake> {
        self.member
            .as_ref()
            .map(|m| m.user.id)
            .or_else(|| self.user.as_ref().map(|u| u.id))
    }

    /// Slash-command name.
    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref()?.name.as_deref()
    }

    /// Component custom ID.
    pub fn custom_id(&self) -> Option<&str> {
        self.data.as_ref()?.custom_id.as_deref()
    }

    /// Values picked in a select menu.
    pub fn values(&self) -> &[String] {
        self.data
            .as_ref()
            .map(|d| d.values.as_slice())
            .unwrap_or_default()
    }

    /// Raw value of a named option.
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.data
            .as_ref()?
            .options
            .iter()
            .find(|opt| opt.name == name)
            .map(|opt| &opt.value)
    }

    /// String option.
    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.option(name)?.as_str()
    }

    /// Boolean option.
    pub fn option_bool(&self, name: &str) -> Option<bool> {
        self.option(name)?.as_bool()
    }

    /// Channel/user/role option, sent as a snowflake string.
    pub fn option_snowflake(&self, name: &str) -> Option<Snowflake> {
        self.option_str(name)?.parse().ok()
    }
}

/// Message flag: only the invoker sees the response.
pub const EPHEMERAL: u64 = 1 << 6;

/// A message component, serialized in Discord's flat shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Component type: 1 row, 2 button, 8 channel select.
    #[serde(rename = "type")]
    pub kind: u8,
    /// Developer-defined ID echoed back on interaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    /// Button label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Button style.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<u8>,
    /// Select placeholder text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Channel types offered by a channel select.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_types: Vec<ChannelKind>,
    /// Children of an action row.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
}

/// Button styles.
pub mod button_style {
    /// Blurple.
    pub const PRIMARY: u8 = 1;
    /// Grey.
    pub const SECONDARY: u8 = 2;
    /// Green.
    pub const SUCCESS: u8 = 3;
}

impl Component {
    fn empty(kind: u8) -> Self {
        Self {
            kind,
            custom_id: None,
            label: None,
            style: None,
            placeholder: None,
            channel_types: Vec::new(),
            components: Vec::new(),
        }
    }

    /// An action row holding up to five buttons or one select.
    pub fn action_row(components: Vec<Component>) -> Self {
        Self {
            components,
            ..Self::empty(1)
        }
    }

    /// A button.
    pub fn button(custom_id: impl Into<String>, label: impl Into<String>, style: u8) -> Self {
        Self {
            custom_id: Some(custom_id.into()),
            label: Some(label.into()),
            style: Some(style),
            ..Self::empty(2)
        }
    }

    /// A channel select menu restricted to `kinds`.
    pub fn channel_select(
        custom_id: impl Into<String>,
        placeholder: impl Into<String>,
        kinds: Vec<ChannelKind>,
    ) -> Self {
        Self {
            custom_id: Some(custom_id.into()),
            placeholder: Some(placeholder.into()),
            channel_types: kinds,
            ..Self::empty(8)
        }
    }
}

/// Interaction callback type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ResponseKind {
    /// Answer a ping.
    Pong,
    /// Reply with a new message.
    ChannelMessage,
    /// Acknowledge now, send a message later.
    DeferredChannelMessage,
    /// Acknowledge a component, edit the message later.
    DeferredUpdateMessage,
    /// Edit the message the component is attached to.
    UpdateMessage,
}

impl From<u8> for ResponseKind {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Self::Pong,
            5 => Self::DeferredChannelMessage,
            6 => Self::DeferredUpdateMessage,
            7 => Self::UpdateMessage,
            _ => Self::ChannelMessage,
        }
    }
}

impl From<ResponseKind> for u8 {
    fn from(kind: ResponseKind) -> Self {
        match kind {
            ResponseKind::Pong => 1,
            ResponseKind::ChannelMessage => 4,
            ResponseKind::DeferredChannelMessage => 5,
            ResponseKind::DeferredUpdateMessage => 6,
            ResponseKind::UpdateMessage => 7,
        }
    }
}

/// Body of a response message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Components; an empty list clears them on update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<Component>>,
    /// Message flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
}

/// An interaction callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResponse {
    /// Callback type.
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    /// Message body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl InteractionResponse {
    /// Ephemeral text reply.
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::ChannelMessage,
            data: Some(ResponseData {
                content: Some(content.into()),
                components: None,
                flags: Some(EPHEMERAL),
            }),
        }
    }

    /// Ephemeral reply with components.
    pub fn ephemeral_with_components(
        content: impl Into<String>,
        components: Vec<Component>,
    ) -> Self {
        Self {
            kind: ResponseKind::ChannelMessage,
            data: Some(ResponseData {
                content: Some(content.into()),
                components: Some(components),
                flags: Some(EPHEMERAL),
            }),
        }
    }

    /// Replace the component message's content and components.
    pub fn update(content: impl Into<String>, components: Vec<Component>) -> Self {
        Self {
            kind: ResponseKind::UpdateMessage,
            data: Some(ResponseData {
                content: Some(content.into()),
                components: Some(components),
                flags: None,
            }),
        }
    }

    /// Acknowledge a component interaction without changing anything yet.
    pub fn deferred_update() -> Self {
        Self {
            kind: ResponseKind::DeferredUpdateMessage,
            data: None,
        }
    }
}
