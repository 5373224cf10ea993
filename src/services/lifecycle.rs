//! Incremental event lifecycle: one transition per notification.

use super::Context;
use super::provision::Provisioner;
use crate::config::MembershipMode;
use crate::db::EventRecord;
use crate::error::{ServiceError, ServiceResult};
use crate::platform::{EditChannel, RoleSpec};
use evchan_proto::{EventStatus, ScheduledEvent, Snowflake, channel_slug};
use tracing::{debug, info, warn};

/// Which notification arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Created,
    Updated,
    Deleted,
}

/// What to do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Create,
    Rename,
    Complete,
    Ignore(&'static str),
}

/// Pick the transition for a notification.
///
/// Redelivered creates are dropped, updates for events we never saw are
/// treated as creates, and terminal states tear down whatever exists.
pub fn plan_transition(trigger: Trigger, status: EventStatus, record_exists: bool) -> Transition {
    match (trigger, status.is_terminal(), record_exists) {
        (Trigger::Created, _, true) => Transition::Ignore("already provisioned"),
        (Trigger::Created, true, false) => Transition::Ignore("created in terminal state"),
        (Trigger::Created, false, false) => Transition::Create,
        (Trigger::Updated, false, true) => Transition::Rename,
        (Trigger::Updated, false, false) => Transition::Create,
        (Trigger::Updated, true, true) | (Trigger::Deleted, _, true) => Transition::Complete,
        (Trigger::Updated, true, false) | (Trigger::Deleted, _, false) => {
            Transition::Ignore("no record")
        }
    }
}

/// Result of handling one lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Created(EventRecord),
    /// Another task stored the record first; this attempt was rolled back.
    LostRace,
    Renamed,
    /// The linked channel is gone; the record was unlinked for the sweep.
    ChannelMissing,
    Completed,
    Skipped(&'static str),
}

pub struct Lifecycle<'a> {
    ctx: &'a Context,
}

impl<'a> Lifecycle<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub async fn handle(
        &self,
        trigger: Trigger,
        event: &ScheduledEvent,
    ) -> ServiceResult<LifecycleOutcome> {
        let record = self.ctx.db.events().find(event.id).await?;
        let transition = plan_transition(trigger, event.status, record.is_some());
        debug!(
            guild_id = %event.guild_id,
            event_id = %event.id,
            ?trigger,
            ?transition,
            "Planned lifecycle transition"
        );

        match (transition, record) {
            (Transition::Create, _) => self.create(event).await,
            (Transition::Rename, Some(record)) => self.rename(&record, &event.name).await,
            (Transition::Complete, Some(record)) => self.complete(&record, Some(&event.name)).await,
            (Transition::Ignore(reason), _) => Ok(LifecycleOutcome::Skipped(reason)),
            (Transition::Rename | Transition::Complete, None) => {
                Ok(LifecycleOutcome::Skipped("no record"))
            }
        }
    }

    /// Provision and record a live event.
    pub async fn create(&self, event: &ScheduledEvent) -> ServiceResult<LifecycleOutcome> {
        let Some(community) = self.ctx.db.communities().find(event.guild_id).await? else {
            return Err(ServiceError::inconsistency(format!(
                "event {} belongs to unknown guild {}",
                event.id, event.guild_id
            )));
        };
        if !community.is_ready() {
            return Ok(LifecycleOutcome::Skipped("community not set up"));
        }

        let provisioner = Provisioner::new(self.ctx);
        let (provisioned, undo) = provisioner.provision(&community, event).await?;
        let record = provisioned.record(event);

        match self.ctx.db.events().insert(&record).await {
            Ok(()) => {
                undo.commit();
                info!(
                    guild_id = %event.guild_id,
                    event_id = %event.id,
                    channel_id = %provisioned.channel_id,
                    "Event channel created"
                );
                Ok(LifecycleOutcome::Created(record))
            }
            Err(e) if e.is_unique_conflict() => {
                info!(
                    event_id = %event.id,
                    "Event already recorded by another task, rolling back"
                );
                undo.rollback(self.ctx.platform.as_ref()).await;
                Ok(LifecycleOutcome::LostRace)
            }
            Err(e) => {
                undo.rollback(self.ctx.platform.as_ref()).await;
                Err(e.into())
            }
        }
    }

    /// Bring the linked channel (and role) in line with the event's name.
    pub async fn rename(
        &self,
        record: &EventRecord,
        event_name: &str,
    ) -> ServiceResult<LifecycleOutcome> {
        let slug = channel_slug(event_name);
        let Some(channel_id) = record.channel_id else {
            return Ok(LifecycleOutcome::ChannelMissing);
        };

        match self
            .ctx
            .platform
            .edit_channel(channel_id, &EditChannel::rename(slug.clone()))
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                warn!(
                    event_id = %record.id,
                    channel_id = %channel_id,
                    "Linked channel no longer exists, unlinking"
                );
                self.ctx.db.events().set_channel(record.id, None).await?;
                return Ok(LifecycleOutcome::ChannelMissing);
            }
            Err(e) => return Err(e.into()),
        }

        if self.ctx.settings.membership_mode == MembershipMode::SharedRole
            && let Some(role_id) = record.role_id
        {
            self.rename_role(record.community_id, role_id, slug).await;
        }

        info!(event_id = %record.id, channel_id = %channel_id, "Event channel renamed");
        Ok(LifecycleOutcome::Renamed)
    }

    async fn rename_role(&self, guild_id: Snowflake, role_id: Snowflake, name: String) {
        let spec = RoleSpec::plain(name, self.ctx.settings.role_color);
        if let Err(e) = self.ctx.platform.edit_role(guild_id, role_id, &spec).await
            && !e.is_not_found()
        {
            warn!(role_id = %role_id, error = %e, "Failed to rename event role");
        }
    }

    /// Archive or delete the event's channel and forget the event.
    pub async fn complete(
        &self,
        record: &EventRecord,
        event_name: Option<&str>,
    ) -> ServiceResult<LifecycleOutcome> {
        let Some(community) = self.ctx.db.communities().find(record.community_id).await? else {
            // Community rows cascade to events, so this only happens mid-removal.
            self.ctx.db.events().delete(record.id).await?;
            return Ok(LifecycleOutcome::Skipped("community removed"));
        };
        Provisioner::new(self.ctx)
            .deprovision(&community, record, event_name)
            .await?;
        Ok(LifecycleOutcome::Completed)
    }
}
