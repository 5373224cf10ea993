//! Guilds and roles.

use crate::channel::Channel;
use crate::permissions::Permissions;
use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// A guild role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role ID. The `@everyone` role shares its ID with the guild.
    pub id: Snowflake,
    /// Display name.
    pub name: String,
    /// RGB color.
    #[serde(default)]
    pub color: u32,
    /// Guild-wide permissions.
    #[serde(default)]
    pub permissions: Permissions,
}

impl Role {
    /// Whether this is the guild's default role.
    pub fn is_everyone(&self, guild_id: Snowflake) -> bool {
        self.id == guild_id
    }
}

/// The subset of a GUILD_CREATE payload the controller reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    /// Guild ID.
    pub id: Snowflake,
    /// Guild name.
    #[serde(default)]
    pub name: String,
    /// Channel where community-update notices land, used as the default
    /// announcement channel.
    #[serde(default)]
    pub public_updates_channel_id: Option<Snowflake>,
    /// Channels, present on GUILD_CREATE.
    #[serde(default)]
    pub channels: Vec<Channel>,
}

/// A guild stub, as sent in READY and GUILD_DELETE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableGuild {
    /// Guild ID.
    pub id: Snowflake,
    /// `true` during an outage; absent when the bot was removed.
    #[serde(default)]
    pub unavailable: Option<bool>,
}
