//! Guild channels and permission overwrites.

use crate::permissions::Permissions;
use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// Channel type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelKind {
    /// A text channel in a guild.
    GuildText,
    /// A voice channel.
    GuildVoice,
    /// A category that groups other channels.
    GuildCategory,
    /// An announcement (news) channel.
    GuildAnnouncement,
    /// Anything this crate does not model.
    Other(u8),
}

impl From<u8> for ChannelKind {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::GuildText,
            2 => Self::GuildVoice,
            4 => Self::GuildCategory,
            5 => Self::GuildAnnouncement,
            other => Self::Other(other),
        }
    }
}

impl From<ChannelKind> for u8 {
    fn from(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::GuildText => 0,
            ChannelKind::GuildVoice => 2,
            ChannelKind::GuildCategory => 4,
            ChannelKind::GuildAnnouncement => 5,
            ChannelKind::Other(raw) => raw,
        }
    }
}

impl ChannelKind {
    /// Whether messages can be posted in channels of this kind.
    pub fn is_text(self) -> bool {
        matches!(self, Self::GuildText | Self::GuildAnnouncement)
    }
}

/// Whom a permission overwrite applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum OverwriteKind {
    /// The overwrite targets a role.
    Role,
    /// The overwrite targets a single member.
    Member,
}

impl From<u8> for OverwriteKind {
    fn from(raw: u8) -> Self {
        if raw == 1 { Self::Member } else { Self::Role }
    }
}

impl From<OverwriteKind> for u8 {
    fn from(kind: OverwriteKind) -> Self {
        match kind {
            OverwriteKind::Role => 0,
            OverwriteKind::Member => 1,
        }
    }
}

/// A channel-level permission overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    /// Role or member ID.
    pub id: Snowflake,
    /// Whether `id` is a role or a member.
    #[serde(rename = "type")]
    pub kind: OverwriteKind,
    /// Explicitly allowed bits.
    #[serde(default)]
    pub allow: Permissions,
    /// Explicitly denied bits.
    #[serde(default)]
    pub deny: Permissions,
}

/// A guild channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel ID.
    pub id: Snowflake,
    /// Owning guild, absent for DM channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Channel type.
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    /// Category the channel sits under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Snowflake>,
    /// Channel topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Explicit overwrites on this channel.
    #[serde(default)]
    pub permission_overwrites: Vec<PermissionOverwrite>,
}
