//! In-memory [`Platform`] for service tests.
//!
//! Keeps a tiny model of guild state, logs every call by operation name, and
//! can be told to fail the next call(s) of a given operation.

use super::{BotIdentity, CreateChannel, EditChannel, Platform, PlatformResult, RoleSpec};
use crate::error::PlatformError;
use async_trait::async_trait;
use evchan_proto::event::EventUserRef;
use evchan_proto::{
    Channel, ChannelKind, CommandDefinition, EventStatus, EventUser, Interaction,
    InteractionResponse, Invite, Message, PermissionOverwrite, Permissions, ResponseData, Role,
    ScheduledEvent, Snowflake,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

pub const BOT_USER: Snowflake = Snowflake::new(1);
pub const APPLICATION: Snowflake = Snowflake::new(2);

/// Injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    Transient,
}

impl Fault {
    fn error(self, op: &str) -> PlatformError {
        match self {
            Fault::NotFound => PlatformError::NotFound(op.to_string()),
            Fault::Transient => PlatformError::Transient(format!("{op}: injected")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub content: String,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    channels: BTreeMap<Snowflake, Channel>,
    roles: BTreeMap<Snowflake, Vec<Role>>,
    events: BTreeMap<Snowflake, Vec<ScheduledEvent>>,
    interested: HashMap<Snowflake, BTreeSet<Snowflake>>,
    member_roles: BTreeSet<(Snowflake, Snowflake, Snowflake)>,
    messages: Vec<SentMessage>,
    responses: Vec<InteractionResponse>,
    edits: Vec<ResponseData>,
    commands: Vec<CommandDefinition>,
    calls: Vec<String>,
    faults: HashMap<&'static str, Vec<Fault>>,
}

impl Inner {
    fn id(&mut self) -> Snowflake {
        self.next_id += 1;
        Snowflake::new(10_000 + self.next_id)
    }

    fn enter(&mut self, op: &'static str) -> PlatformResult<()> {
        self.calls.push(op.to_string());
        if let Some(queue) = self.faults.get_mut(op)
            && !queue.is_empty()
        {
            return Err(queue.remove(0).error(op));
        }
        Ok(())
    }

    fn channel_mut(&mut self, id: Snowflake) -> PlatformResult<&mut Channel> {
        self.channels
            .get_mut(&id)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {id}")))
    }
}

pub struct FakePlatform {
    inner: Mutex<Inner>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Register a guild with its everyone role.
    pub fn add_guild(&self, guild_id: Snowflake) {
        self.lock().roles.entry(guild_id).or_default().push(Role {
            id: guild_id,
            name: "@everyone".to_string(),
            color: 0,
            permissions: Permissions::NONE,
        });
    }

    /// Register a guild whose role list lacks the everyone role.
    pub fn add_guild_without_everyone(&self, guild_id: Snowflake) {
        self.lock().roles.entry(guild_id).or_default();
    }

    pub fn add_channel(&self, guild_id: Snowflake, name: &str, kind: ChannelKind) -> Snowflake {
        let mut inner = self.lock();
        let id = inner.id();
        inner.channels.insert(
            id,
            Channel {
                id,
                guild_id: Some(guild_id),
                name: name.to_string(),
                kind,
                parent_id: None,
                topic: None,
                permission_overwrites: Vec::new(),
            },
        );
        id
    }

    pub fn add_event(&self, guild_id: Snowflake, id: Snowflake, name: &str) -> ScheduledEvent {
        let event = ScheduledEvent {
            id,
            guild_id,
            name: name.to_string(),
            description: None,
            status: EventStatus::Scheduled,
            user_count: None,
        };
        self.lock()
            .events
            .entry(guild_id)
            .or_default()
            .push(event.clone());
        event
    }

    pub fn remove_event(&self, guild_id: Snowflake, id: Snowflake) {
        if let Some(events) = self.lock().events.get_mut(&guild_id) {
            events.retain(|e| e.id != id);
        }
    }

    pub fn rename_event(&self, guild_id: Snowflake, id: Snowflake, name: &str) {
        if let Some(events) = self.lock().events.get_mut(&guild_id) {
            for event in events.iter_mut().filter(|e| e.id == id) {
                event.name = name.to_string();
            }
        }
    }

    pub fn set_event_status(&self, guild_id: Snowflake, id: Snowflake, status: EventStatus) {
        if let Some(events) = self.lock().events.get_mut(&guild_id) {
            for event in events.iter_mut().filter(|e| e.id == id) {
                event.status = status;
            }
        }
    }

    pub fn add_interested(&self, event_id: Snowflake, user_id: Snowflake) {
        self.lock()
            .interested
            .entry(event_id)
            .or_default()
            .insert(user_id);
    }

    /// Fail the next call of `op` with `fault`.
    pub fn fail_next(&self, op: &'static str, fault: Fault) {
        self.lock().faults.entry(op).or_default().push(fault);
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_times(&self, op: &'static str, fault: Fault, times: usize) {
        self.lock()
            .faults
            .entry(op)
            .or_default()
            .extend(std::iter::repeat_n(fault, times));
    }

    /// Delete a channel behind the controller's back.
    pub fn drop_channel(&self, id: Snowflake) {
        self.lock().channels.remove(&id);
    }

    pub fn channel(&self, id: Snowflake) -> Option<Channel> {
        self.lock().channels.get(&id).cloned()
    }

    pub fn channel_named(&self, name: &str) -> Option<Channel> {
        self.lock()
            .channels
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn role(&self, guild_id: Snowflake, id: Snowflake) -> Option<Role> {
        self.lock()
            .roles
            .get(&guild_id)?
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Roles other than everyone.
    pub fn extra_roles(&self, guild_id: Snowflake) -> Vec<Role> {
        self.lock()
            .roles
            .get(&guild_id)
            .map(|roles| roles.iter().filter(|r| r.id != guild_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_member_role(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake) -> bool {
        self.lock()
            .member_roles
            .contains(&(guild_id, user_id, role_id))
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.lock().messages.clone()
    }

    pub fn responses(&self) -> Vec<InteractionResponse> {
        self.lock().responses.clone()
    }

    pub fn edits(&self) -> Vec<ResponseData> {
        self.lock().edits.clone()
    }

    pub fn commands(&self) -> Vec<CommandDefinition> {
        self.lock().commands.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == op).count()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn current_identity(&self) -> PlatformResult<BotIdentity> {
        self.lock().enter("current_identity")?;
        Ok(BotIdentity {
            user_id: BOT_USER,
            application_id: APPLICATION,
        })
    }

    async fn list_channels(&self, guild_id: Snowflake) -> PlatformResult<Vec<Channel>> {
        let mut inner = self.lock();
        inner.enter("list_channels")?;
        Ok(inner
            .channels
            .values()
            .filter(|c| c.guild_id == Some(guild_id))
            .cloned()
            .collect())
    }

    async fn get_channel(&self, channel_id: Snowflake) -> PlatformResult<Channel> {
        let mut inner = self.lock();
        inner.enter("get_channel")?;
        inner.channel_mut(channel_id).map(|c| c.clone())
    }

    async fn create_channel(
        &self,
        guild_id: Snowflake,
        spec: &CreateChannel,
    ) -> PlatformResult<Channel> {
        let mut inner = self.lock();
        inner.enter("create_channel")?;
        let id = inner.id();
        let channel = Channel {
            id,
            guild_id: Some(guild_id),
            name: spec.name.clone(),
            kind: spec.kind,
            parent_id: spec.parent_id,
            topic: spec.topic.clone(),
            permission_overwrites: spec.permission_overwrites.clone(),
        };
        inner.channels.insert(id, channel.clone());
        Ok(channel)
    }

    async fn edit_channel(
        &self,
        channel_id: Snowflake,
        edit: &EditChannel,
    ) -> PlatformResult<Channel> {
        let mut inner = self.lock();
        inner.enter("edit_channel")?;
        let channel = inner.channel_mut(channel_id)?;
        if let Some(name) = &edit.name {
            channel.name = name.clone();
        }
        Ok(channel.clone())
    }

    async fn delete_channel(&self, channel_id: Snowflake) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("delete_channel")?;
        inner
            .channels
            .remove(&channel_id)
            .map(drop)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel_id}")))
    }

    async fn list_roles(&self, guild_id: Snowflake) -> PlatformResult<Vec<Role>> {
        let mut inner = self.lock();
        inner.enter("list_roles")?;
        inner
            .roles
            .get(&guild_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("guild {guild_id}")))
    }

    async fn create_role(&self, guild_id: Snowflake, spec: &RoleSpec) -> PlatformResult<Role> {
        let mut inner = self.lock();
        inner.enter("create_role")?;
        let role = Role {
            id: inner.id(),
            name: spec.name.clone(),
            color: spec.color,
            permissions: spec.permissions,
        };
        inner.roles.entry(guild_id).or_default().push(role.clone());
        Ok(role)
    }

    async fn edit_role(
        &self,
        guild_id: Snowflake,
        role_id: Snowflake,
        spec: &RoleSpec,
    ) -> PlatformResult<Role> {
        let mut inner = self.lock();
        inner.enter("edit_role")?;
        let role = inner
            .roles
            .get_mut(&guild_id)
            .and_then(|roles| roles.iter_mut().find(|r| r.id == role_id))
            .ok_or_else(|| PlatformError::NotFound(format!("role {role_id}")))?;
        role.name = spec.name.clone();
        role.color = spec.color;
        role.permissions = spec.permissions;
        Ok(role.clone())
    }

    async fn delete_role(&self, guild_id: Snowflake, role_id: Snowflake) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("delete_role")?;
        let roles = inner.roles.entry(guild_id).or_default();
        let before = roles.len();
        roles.retain(|r| r.id != role_id);
        if roles.len() == before {
            return Err(PlatformError::NotFound(format!("role {role_id}")));
        }
        Ok(())
    }

    async fn set_permission_overwrite(
        &self,
        channel_id: Snowflake,
        overwrite: &PermissionOverwrite,
    ) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("set_permission_overwrite")?;
        let channel = inner.channel_mut(channel_id)?;
        channel
            .permission_overwrites
            .retain(|o| o.id != overwrite.id);
        channel.permission_overwrites.push(overwrite.clone());
        Ok(())
    }

    async fn clear_permission_overwrite(
        &self,
        channel_id: Snowflake,
        target_id: Snowflake,
    ) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("clear_permission_overwrite")?;
        let channel = inner.channel_mut(channel_id)?;
        channel.permission_overwrites.retain(|o| o.id != target_id);
        Ok(())
    }

    async fn send_message(&self, channel_id: Snowflake, content: &str) -> PlatformResult<Message> {
        let mut inner = self.lock();
        inner.enter("send_message")?;
        inner.channel_mut(channel_id)?;
        let id = inner.id();
        inner.messages.push(SentMessage {
            id,
            channel_id,
            content: content.to_string(),
        });
        Ok(Message { id, channel_id })
    }

    async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("delete_message")?;
        let before = inner.messages.len();
        inner
            .messages
            .retain(|m| !(m.id == message_id && m.channel_id == channel_id));
        if inner.messages.len() == before {
            return Err(PlatformError::NotFound(format!("message {message_id}")));
        }
        Ok(())
    }

    async fn create_invite(&self, channel_id: Snowflake) -> PlatformResult<Invite> {
        let mut inner = self.lock();
        inner.enter("create_invite")?;
        inner.channel_mut(channel_id)?;
        Ok(Invite {
            code: format!("inv{channel_id}"),
        })
    }

    async fn list_scheduled_events(
        &self,
        guild_id: Snowflake,
    ) -> PlatformResult<Vec<ScheduledEvent>> {
        let mut inner = self.lock();
        inner.enter("list_scheduled_events")?;
        Ok(inner.events.get(&guild_id).cloned().unwrap_or_default())
    }

    async fn list_interested_users(
        &self,
        _guild_id: Snowflake,
        event_id: Snowflake,
        limit: u32,
        after: Option<Snowflake>,
    ) -> PlatformResult<Vec<EventUser>> {
        let mut inner = self.lock();
        inner.enter("list_interested_users")?;
        Ok(inner
            .interested
            .get(&event_id)
            .map(|users| {
                users
                    .iter()
                    .filter(|u| after.is_none_or(|a| **u > a))
                    .take(limit as usize)
                    .map(|&id| EventUser {
                        guild_scheduled_event_id: event_id,
                        user: EventUserRef { id },
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("add_member_role")?;
        inner.member_roles.insert((guild_id, user_id, role_id));
        Ok(())
    }

    async fn remove_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("remove_member_role")?;
        inner.member_roles.remove(&(guild_id, user_id, role_id));
        Ok(())
    }

    async fn respond_to_interaction(
        &self,
        _interaction: &Interaction,
        response: &InteractionResponse,
    ) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("respond_to_interaction")?;
        inner.responses.push(response.clone());
        Ok(())
    }

    async fn edit_interaction_response(
        &self,
        _interaction: &Interaction,
        data: &ResponseData,
    ) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("edit_interaction_response")?;
        inner.edits.push(data.clone());
        Ok(())
    }

    async fn register_commands(
        &self,
        _application_id: Snowflake,
        commands: &[CommandDefinition],
    ) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.enter("register_commands")?;
        inner.commands = commands.to_vec();
        Ok(())
    }
}
