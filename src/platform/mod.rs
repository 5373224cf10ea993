//! The external chat platform, seen through one trait.
//!
//! Services only ever hold an `Arc<dyn Platform>`. [`RestClient`] talks to the
//! real REST API; tests substitute `fake::FakePlatform`.

mod gateway;
mod rest;

#[cfg(test)]
pub mod fake;

pub use gateway::Gateway;
pub use rest::RestClient;

use crate::error::PlatformError;
use async_trait::async_trait;
use evchan_proto::{
    Channel, ChannelKind, CommandDefinition, EventUser, Interaction, InteractionResponse, Invite,
    Message, OverwriteKind, PermissionOverwrite, Permissions, ResponseData, Role, ScheduledEvent,
    Snowflake,
};
use serde::Serialize;

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Who the controller is on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: Snowflake,
    pub application_id: Snowflake,
}

/// Body for creating a guild channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateChannel {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Snowflake>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permission_overwrites: Vec<PermissionOverwrite>,
}

impl CreateChannel {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::GuildText,
            parent_id: None,
            topic: None,
            permission_overwrites: Vec::new(),
        }
    }

    pub fn under(mut self, parent_id: Option<Snowflake>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// Body for editing a channel. Only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EditChannel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EditChannel {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Body for creating or editing a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSpec {
    pub name: String,
    pub color: u32,
    pub permissions: Permissions,
    pub hoist: bool,
    pub mentionable: bool,
}

impl RoleSpec {
    /// A role that grants nothing guild-wide; access comes from channel overwrites.
    pub fn plain(name: impl Into<String>, color: u32) -> Self {
        Self {
            name: name.into(),
            color,
            permissions: Permissions::NONE,
            hoist: false,
            mentionable: false,
        }
    }
}

/// Build an overwrite granting `allow` and denying `deny`.
pub fn overwrite(
    id: Snowflake,
    kind: OverwriteKind,
    allow: Permissions,
    deny: Permissions,
) -> PermissionOverwrite {
    PermissionOverwrite {
        id,
        kind,
        allow,
        deny,
    }
}

/// Every operation the controller performs against the platform.
///
/// Any call may fail with [`PlatformError::NotFound`] or a transient error.
#[async_trait]
pub trait Platform: Send + Sync {
    /// The bot user and application behind the token.
    async fn current_identity(&self) -> PlatformResult<BotIdentity>;

    async fn list_channels(&self, guild_id: Snowflake) -> PlatformResult<Vec<Channel>>;
    async fn get_channel(&self, channel_id: Snowflake) -> PlatformResult<Channel>;
    async fn create_channel(
        &self,
        guild_id: Snowflake,
        spec: &CreateChannel,
    ) -> PlatformResult<Channel>;
    async fn edit_channel(
        &self,
        channel_id: Snowflake,
        edit: &EditChannel,
    ) -> PlatformResult<Channel>;
    async fn delete_channel(&self, channel_id: Snowflake) -> PlatformResult<()>;

    async fn list_roles(&self, guild_id: Snowflake) -> PlatformResult<Vec<Role>>;
    async fn create_role(&self, guild_id: Snowflake, spec: &RoleSpec) -> PlatformResult<Role>;
    async fn edit_role(
        &self,
        guild_id: Snowflake,
        role_id: Snowflake,
        spec: &RoleSpec,
    ) -> PlatformResult<Role>;
    async fn delete_role(&self, guild_id: Snowflake, role_id: Snowflake) -> PlatformResult<()>;

    /// Create or replace the overwrite for `overwrite.id` on a channel.
    async fn set_permission_overwrite(
        &self,
        channel_id: Snowflake,
        overwrite: &PermissionOverwrite,
    ) -> PlatformResult<()>;
    async fn clear_permission_overwrite(
        &self,
        channel_id: Snowflake,
        target_id: Snowflake,
    ) -> PlatformResult<()>;

    async fn send_message(&self, channel_id: Snowflake, content: &str) -> PlatformResult<Message>;
    async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> PlatformResult<()>;

    async fn create_invite(&self, channel_id: Snowflake) -> PlatformResult<Invite>;

    async fn list_scheduled_events(&self, guild_id: Snowflake)
    -> PlatformResult<Vec<ScheduledEvent>>;

    /// One page of users interested in an event, ordered by user ID, starting
    /// after `after`.
    async fn list_interested_users(
        &self,
        guild_id: Snowflake,
        event_id: Snowflake,
        limit: u32,
        after: Option<Snowflake>,
    ) -> PlatformResult<Vec<EventUser>>;

    async fn add_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> PlatformResult<()>;
    async fn remove_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> PlatformResult<()>;

    async fn respond_to_interaction(
        &self,
        interaction: &Interaction,
        response: &InteractionResponse,
    ) -> PlatformResult<()>;
    /// Edit the original response of an interaction that was deferred.
    async fn edit_interaction_response(
        &self,
        interaction: &Interaction,
        data: &ResponseData,
    ) -> PlatformResult<()>;

    /// Overwrite the global command set.
    async fn register_commands(
        &self,
        application_id: Snowflake,
        commands: &[CommandDefinition],
    ) -> PlatformResult<()>;
}

/// Treat "not found" as success, for deletes and edits of things that may
/// already be gone.
pub fn ignore_not_found(result: PlatformResult<()>) -> PlatformResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
