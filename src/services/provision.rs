//! Standing up and tearing down the resources that represent one event.
//!
//! Provisioning is several platform calls with no transaction around them.
//! Every successful side effect pushes its inverse onto a [`Compensation`];
//! on failure the list is unwound newest-first before the error surfaces.

use super::Context;
use crate::config::MembershipMode;
use crate::db::{CommunityRecord, EventRecord};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::platform::{CreateChannel, EditChannel, Platform, RoleSpec, ignore_not_found, overwrite};
use evchan_proto::{
    ARCHIVE_PREFIX, Message, OverwriteKind, Permissions, ScheduledEvent, Snowflake, archived_slug,
    channel_slug,
};
use tracing::{debug, info, warn};

/// What the bot grants itself on every event channel.
const BOT_ALLOW: Permissions = Permissions::from_bits(
    Permissions::EVENT_MEMBER.bits() | Permissions::CREATE_INSTANT_INVITE.bits(),
);

/// An undo action for one provisioning side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Undo {
    DeleteChannel(Snowflake),
    DeleteRole {
        guild_id: Snowflake,
        role_id: Snowflake,
    },
    DeleteMessage {
        channel_id: Snowflake,
        message_id: Snowflake,
    },
}

/// Ordered undo list for a provisioning attempt.
#[derive(Debug, Default)]
#[must_use = "a compensation must be committed or rolled back"]
pub struct Compensation {
    steps: Vec<Undo>,
}

impl Compensation {
    fn push(&mut self, undo: Undo) {
        self.steps.push(undo);
    }

    /// Keep every side effect.
    pub fn commit(self) {}

    /// Undo every recorded side effect, newest first. Failures are logged and
    /// do not stop the remaining steps.
    pub async fn rollback(mut self, platform: &dyn Platform) {
        if self.steps.is_empty() {
            return;
        }
        metrics::record_rollback();
        while let Some(step) = self.steps.pop() {
            let result = match step {
                Undo::DeleteChannel(channel_id) => platform.delete_channel(channel_id).await,
                Undo::DeleteRole { guild_id, role_id } => {
                    platform.delete_role(guild_id, role_id).await
                }
                Undo::DeleteMessage {
                    channel_id,
                    message_id,
                } => platform.delete_message(channel_id, message_id).await,
            };
            if let Err(e) = ignore_not_found(result) {
                warn!(?step, error = %e, "Rollback step failed");
            } else {
                debug!(?step, "Rolled back");
            }
        }
    }
}

/// Resources created for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub channel_id: Snowflake,
    pub role_id: Option<Snowflake>,
    pub announcement: Option<Message>,
}

impl Provisioned {
    /// The record that maps `event` to these resources.
    pub fn record(&self, event: &ScheduledEvent) -> EventRecord {
        let record = EventRecord::new(event.id, event.guild_id)
            .with_channel(self.channel_id)
            .with_role(self.role_id);
        match &self.announcement {
            Some(message) => record.with_announcement(message.channel_id, message.id),
            None => record,
        }
    }
}

/// Composes platform calls into provision and deprovision.
pub struct Provisioner<'a> {
    ctx: &'a Context,
}

impl<'a> Provisioner<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    fn platform(&self) -> &dyn Platform {
        self.ctx.platform.as_ref()
    }

    /// The guild's everyone role, which always shares the guild's ID.
    pub async fn everyone_role(&self, guild_id: Snowflake) -> ServiceResult<Snowflake> {
        self.platform()
            .list_roles(guild_id)
            .await?
            .into_iter()
            .find(|role| role.is_everyone(guild_id))
            .map(|role| role.id)
            .ok_or_else(|| {
                ServiceError::inconsistency(format!("guild {guild_id} has no everyone role"))
            })
    }

    /// Create the channel, role and announcement for `event`.
    ///
    /// On failure everything created so far is removed before the error is
    /// returned. On success the caller owns the returned [`Compensation`] and
    /// must commit it once the record is stored, or roll it back.
    pub async fn provision(
        &self,
        community: &CommunityRecord,
        event: &ScheduledEvent,
    ) -> ServiceResult<(Provisioned, Compensation)> {
        let mut undo = Compensation::default();
        match self.provision_steps(community, event, &mut undo).await {
            Ok(provisioned) => {
                info!(
                    guild_id = %event.guild_id,
                    event_id = %event.id,
                    channel_id = %provisioned.channel_id,
                    "Provisioned event channel"
                );
                Ok((provisioned, undo))
            }
            Err(e) => {
                warn!(
                    guild_id = %event.guild_id,
                    event_id = %event.id,
                    error = %e,
                    "Provisioning failed, rolling back"
                );
                undo.rollback(self.platform()).await;
                Err(e)
            }
        }
    }

    async fn provision_steps(
        &self,
        community: &CommunityRecord,
        event: &ScheduledEvent,
        undo: &mut Compensation,
    ) -> ServiceResult<Provisioned> {
        let guild_id = event.guild_id;
        let everyone = self.everyone_role(guild_id).await?;

        let role_id = match self.ctx.settings.membership_mode {
            MembershipMode::SharedRole => {
                Some(self.create_event_role(guild_id, &event.name, undo).await?)
            }
            MembershipMode::PerUserOverwrite => None,
        };

        let channel_id = self
            .create_event_channel(community, &event.name, everyone, role_id, undo)
            .await?;

        let announcement = match community.announce_channel_id {
            Some(announce_channel) => {
                let invite = self.platform().create_invite(channel_id).await?;
                let content =
                    community.announcement(&event.name, &invite.event_url(event.id));
                let message = self
                    .platform()
                    .send_message(announce_channel, &content)
                    .await?;
                undo.push(Undo::DeleteMessage {
                    channel_id: message.channel_id,
                    message_id: message.id,
                });
                Some(message)
            }
            None => None,
        };

        Ok(Provisioned {
            channel_id,
            role_id,
            announcement,
        })
    }

    async fn create_event_role(
        &self,
        guild_id: Snowflake,
        event_name: &str,
        undo: &mut Compensation,
    ) -> ServiceResult<Snowflake> {
        let spec = RoleSpec::plain(channel_slug(event_name), self.ctx.settings.role_color);
        let role = self.platform().create_role(guild_id, &spec).await?;
        undo.push(Undo::DeleteRole {
            guild_id,
            role_id: role.id,
        });
        Ok(role.id)
    }

    async fn create_event_channel(
        &self,
        community: &CommunityRecord,
        event_name: &str,
        everyone: Snowflake,
        role_id: Option<Snowflake>,
        undo: &mut Compensation,
    ) -> ServiceResult<Snowflake> {
        let spec = CreateChannel::text(channel_slug(event_name)).under(community.category_id);
        let channel = self.platform().create_channel(community.id, &spec).await?;
        undo.push(Undo::DeleteChannel(channel.id));
        self.apply_visibility(channel.id, everyone, role_id).await?;
        Ok(channel.id)
    }

    /// Channel-only provisioning, for a record whose channel is missing.
    pub async fn provision_channel(
        &self,
        community: &CommunityRecord,
        event_name: &str,
        role_id: Option<Snowflake>,
    ) -> ServiceResult<Snowflake> {
        let mut undo = Compensation::default();
        let result = async {
            let everyone = self.everyone_role(community.id).await?;
            self.create_event_channel(community, event_name, everyone, role_id, &mut undo)
                .await
        }
        .await;

        match result {
            Ok(channel_id) => {
                undo.commit();
                Ok(channel_id)
            }
            Err(e) => {
                undo.rollback(self.platform()).await;
                Err(e)
            }
        }
    }

    /// Hide a channel from everyone except the bot and, if given, the event
    /// role.
    pub async fn apply_visibility(
        &self,
        channel_id: Snowflake,
        everyone: Snowflake,
        role_id: Option<Snowflake>,
    ) -> ServiceResult<()> {
        let platform = self.platform();
        platform
            .set_permission_overwrite(
                channel_id,
                &overwrite(
                    self.ctx.bot.user_id,
                    OverwriteKind::Member,
                    BOT_ALLOW,
                    Permissions::NONE,
                ),
            )
            .await?;
        if let Some(role_id) = role_id {
            platform
                .set_permission_overwrite(
                    channel_id,
                    &overwrite(
                        role_id,
                        OverwriteKind::Role,
                        Permissions::EVENT_MEMBER,
                        Permissions::NONE,
                    ),
                )
                .await?;
        }
        platform
            .set_permission_overwrite(
                channel_id,
                &overwrite(
                    everyone,
                    OverwriteKind::Role,
                    Permissions::NONE,
                    Permissions::VIEW_CHANNEL,
                ),
            )
            .await?;
        Ok(())
    }

    /// Tear down an event's resources and forget it.
    ///
    /// The channel is deleted or archived per the community setting, then the
    /// role, the announcement and the record are removed. Every step runs even if an
    /// earlier one failed; the first failure is returned afterwards.
    /// `event_name` is the event's current name when known; orphans found by
    /// the reconciler have none and are archived under their channel's name.
    pub async fn deprovision(
        &self,
        community: &CommunityRecord,
        record: &EventRecord,
        event_name: Option<&str>,
    ) -> ServiceResult<()> {
        let mut first_error: Option<ServiceError> = None;
        let mut note = |step: &'static str, result: ServiceResult<()>| {
            if let Err(e) = result {
                warn!(
                    guild_id = %record.community_id,
                    event_id = %record.id,
                    step,
                    error = %e,
                    "Teardown step failed"
                );
                first_error.get_or_insert(e);
            }
        };

        if let Some(channel_id) = record.channel_id {
            let result = if community.delete_when_done {
                ignore_not_found(self.platform().delete_channel(channel_id).await)
                    .map_err(ServiceError::from)
            } else {
                self.archive_channel(channel_id, event_name).await
            };
            note("channel", result);
        }

        if let Some(role_id) = record.role_id {
            let result = ignore_not_found(
                self.platform()
                    .delete_role(record.community_id, role_id)
                    .await,
            );
            note("role", result.map_err(ServiceError::from));
        }

        if let (Some(channel_id), Some(message_id)) =
            (record.announce_channel_id, record.announce_message_id)
        {
            let result = ignore_not_found(
                self.platform()
                    .delete_message(channel_id, message_id)
                    .await,
            );
            note("announcement", result.map_err(ServiceError::from));
        }

        let result = self.ctx.db.events().delete(record.id).await;
        note("record", result.map(drop).map_err(ServiceError::from));

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    guild_id = %record.community_id,
                    event_id = %record.id,
                    archived = !community.delete_when_done,
                    "Event torn down"
                );
                Ok(())
            }
        }
    }

    async fn archive_channel(
        &self,
        channel_id: Snowflake,
        event_name: Option<&str>,
    ) -> ServiceResult<()> {
        let name = match event_name {
            Some(name) => archived_slug(name),
            None => {
                let channel = match self.platform().get_channel(channel_id).await {
                    Ok(channel) => channel,
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                if channel.name.starts_with(ARCHIVE_PREFIX) {
                    return Ok(());
                }
                format!("{ARCHIVE_PREFIX}{}", channel.name)
            }
        };
        let result = self
            .platform()
            .edit_channel(channel_id, &EditChannel::rename(name))
            .await
            .map(drop);
        Ok(ignore_not_found(result)?)
    }
}
