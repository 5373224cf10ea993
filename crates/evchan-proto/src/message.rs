//! Messages and invites.

use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// A posted message. Only identity is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID.
    pub id: Snowflake,
    /// Channel the message was posted in.
    pub channel_id: Snowflake,
}

/// A channel invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    /// Invite code, the path segment of `discord.gg/<code>`.
    pub code: String,
}

impl Invite {
    /// Invite link that opens the scheduled event.
    pub fn event_url(&self, event_id: Snowflake) -> String {
        format!("https://discord.gg/{}?event={}", self.code, event_id)
    }
}
