//! Guild scheduled events.

use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum EventStatus {
    /// Announced, not started.
    Scheduled,
    /// Running now.
    Active,
    /// Finished.
    Completed,
    /// Called off.
    Canceled,
    /// A status code this crate does not know.
    Unknown(u8),
}

impl From<u8> for EventStatus {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Self::Scheduled,
            2 => Self::Active,
            3 => Self::Completed,
            4 => Self::Canceled,
            other => Self::Unknown(other),
        }
    }
}

impl From<EventStatus> for u8 {
    fn from(status: EventStatus) -> Self {
        match status {
            EventStatus::Scheduled => 1,
            EventStatus::Active => 2,
            EventStatus::Completed => 3,
            EventStatus::Canceled => 4,
            EventStatus::Unknown(raw) => raw,
        }
    }
}

impl EventStatus {
    /// Completed and canceled events never come back.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// A guild scheduled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// Event ID.
    pub id: Snowflake,
    /// Owning guild.
    pub guild_id: Snowflake,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Current status.
    pub status: EventStatus,
    /// Number of interested users, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_count: Option<u32>,
}

/// One entry of the interested-users listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUser {
    /// The event the user is interested in.
    pub guild_scheduled_event_id: Snowflake,
    /// The interested user.
    pub user: EventUserRef,
}

/// Minimal user object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUserRef {
    /// User ID.
    pub id: Snowflake,
}
