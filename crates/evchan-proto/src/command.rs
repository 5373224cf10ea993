//! Application-command definitions for registration.

use crate::channel::ChannelKind;
use crate::permissions::Permissions;
use serde::{Deserialize, Serialize};

/// Option value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum CommandOptionKind {
    /// Free text.
    String,
    /// True/false.
    Boolean,
    /// A channel reference.
    Channel,
    /// Anything else.
    Other(u8),
}

impl From<u8> for CommandOptionKind {
    fn from(raw: u8) -> Self {
        match raw {
            3 => Self::String,
            5 => Self::Boolean,
            7 => Self::Channel,
            other => Self::Other(other),
        }
    }
}

impl From<CommandOptionKind> for u8 {
    fn from(kind: CommandOptionKind) -> Self {
        match kind {
            CommandOptionKind::String => 3,
            CommandOptionKind::Boolean => 5,
            CommandOptionKind::Channel => 7,
            CommandOptionKind::Other(raw) => raw,
        }
    }
}

/// One declared option of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOptionDefinition {
    /// Value type.
    #[serde(rename = "type")]
    pub kind: CommandOptionKind,
    /// Option name.
    pub name: String,
    /// Help text.
    pub description: String,
    /// Whether the option must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Maximum string length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u16>,
    /// Allowed channel kinds for channel options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_types: Vec<ChannelKind>,
}

/// A chat-input command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDefinition {
    /// Command name.
    pub name: String,
    /// Help text.
    pub description: String,
    /// Declared options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOptionDefinition>,
    /// Permissions a member needs to see the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_member_permissions: Option<Permissions>,
    /// Whether the command is usable in DMs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_permission: Option<bool>,
}
