//! `event-channels-initial-sync`: link channels that already exist to
//! events that already exist, one event at a time.
//!
//! No state is kept between interactions. Each component carries its action
//! and event ID in its custom ID, and the next event to offer is recomputed
//! from the live event list and the stored records.

use crate::config::MembershipMode;
use crate::db::{CommunityRecord, CommunityUpdate, EventRecord};
use crate::error::{ServiceError, ServiceResult};
use crate::platform::RoleSpec;
use crate::services::{Context, Membership, Provisioner, ReconcileReport, Reconciler};
use evchan_proto::interaction::button_style;
use evchan_proto::{
    ChannelKind, Component, InteractionResponse, ScheduledEvent, Snowflake, channel_slug,
};
use std::collections::HashMap;
use tracing::{info, warn};

const CUSTOM_ID_PREFIX: &str = "evchan:sync:";

/// A button or select in the sync flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Link the selected channel to this event.
    Link(Snowflake),
    /// Leave this event for the sweep to provision.
    Skip(Snowflake),
    Finish,
}

impl SyncAction {
    pub fn parse(custom_id: &str) -> Option<Self> {
        let rest = custom_id.strip_prefix(CUSTOM_ID_PREFIX)?;
        if rest == "finish" {
            return Some(Self::Finish);
        }
        let (action, id) = rest.split_once(':')?;
        let id = id.parse().ok()?;
        match action {
            "link" => Some(Self::Link(id)),
            "skip" => Some(Self::Skip(id)),
            _ => None,
        }
    }

    pub fn custom_id(&self) -> String {
        match self {
            Self::Link(id) => format!("{CUSTOM_ID_PREFIX}link:{id}"),
            Self::Skip(id) => format!("{CUSTOM_ID_PREFIX}skip:{id}"),
            Self::Finish => format!("{CUSTOM_ID_PREFIX}finish"),
        }
    }
}

/// Content and components for one step of the flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub content: String,
    pub components: Vec<Component>,
}

async fn configured_community(
    ctx: &Context,
    guild_id: Snowflake,
) -> ServiceResult<CommunityRecord> {
    let community = ctx.ensure_community(guild_id).await?;
    if !community.configuration_completed {
        return Err(ServiceError::validation(format!(
            "Set the bot options with `/{}` first.",
            super::schema::OPTIONS_COMMAND
        )));
    }
    if community.initial_sync_completed {
        return Err(ServiceError::validation(
            "The initial sync has already been completed for this server.",
        ));
    }
    Ok(community)
}

async fn live_events(ctx: &Context, guild_id: Snowflake) -> ServiceResult<Vec<ScheduledEvent>> {
    let mut events: Vec<ScheduledEvent> = ctx
        .platform
        .list_scheduled_events(guild_id)
        .await?
        .into_iter()
        .filter(|e| !e.status.is_terminal())
        .collect();
    events.sort_by_key(|e| e.id);
    Ok(events)
}

/// The next unrecorded live event after `after`, as a prompt.
pub async fn next_step(
    ctx: &Context,
    guild_id: Snowflake,
    after: Option<Snowflake>,
) -> ServiceResult<Step> {
    let recorded: Vec<Snowflake> = ctx
        .db
        .events()
        .list_for_community(guild_id)
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();
    let next = live_events(ctx, guild_id)
        .await?
        .into_iter()
        .filter(|e| after.is_none_or(|after| e.id > after))
        .find(|e| !recorded.contains(&e.id));

    let finish = Component::button(
        SyncAction::Finish.custom_id(),
        "Finish",
        button_style::SUCCESS,
    );
    Ok(match next {
        Some(event) => Step {
            content: format!(
                "Which existing channel belongs to **{}**? Skip it to get a new channel instead.",
                event.name
            ),
            components: vec![
                Component::action_row(vec![Component::channel_select(
                    SyncAction::Link(event.id).custom_id(),
                    "Pick a channel",
                    vec![ChannelKind::GuildText],
                )]),
                Component::action_row(vec![
                    Component::button(
                        SyncAction::Skip(event.id).custom_id(),
                        "Skip",
                        button_style::SECONDARY,
                    ),
                    finish,
                ]),
            ],
        },
        None => Step {
            content: "Every event has been handled. Press Finish to hide the linked channels \
                      and start managing events."
                .to_string(),
            components: vec![Component::action_row(vec![finish])],
        },
    })
}

/// Start the flow.
pub async fn start(ctx: &Context, guild_id: Snowflake) -> ServiceResult<InteractionResponse> {
    configured_community(ctx, guild_id).await?;
    let step = next_step(ctx, guild_id, None).await?;
    Ok(InteractionResponse::ephemeral_with_components(
        step.content,
        step.components,
    ))
}

/// Handle a link or skip, answering with the next step.
pub async fn advance(
    ctx: &Context,
    guild_id: Snowflake,
    action: SyncAction,
    selected: &[String],
) -> ServiceResult<InteractionResponse> {
    configured_community(ctx, guild_id).await?;
    let event_id = match action {
        SyncAction::Link(event_id) => {
            let channel_id = selected
                .first()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ServiceError::validation("Pick a channel first."))?;
            link(ctx, guild_id, event_id, channel_id).await?;
            event_id
        }
        SyncAction::Skip(event_id) => event_id,
        SyncAction::Finish => {
            return Err(ServiceError::inconsistency("finish is not a step"));
        }
    };
    let step = next_step(ctx, guild_id, Some(event_id)).await?;
    Ok(InteractionResponse::update(step.content, step.components))
}

async fn link(
    ctx: &Context,
    guild_id: Snowflake,
    event_id: Snowflake,
    channel_id: Snowflake,
) -> ServiceResult<()> {
    if !live_events(ctx, guild_id).await?.iter().any(|e| e.id == event_id) {
        return Err(ServiceError::validation("That event no longer exists."));
    }

    let channel = match ctx.platform.get_channel(channel_id).await {
        Ok(channel) => channel,
        Err(e) if e.is_not_found() => {
            return Err(ServiceError::validation("That channel no longer exists."));
        }
        Err(e) => return Err(e.into()),
    };
    if channel.guild_id != Some(guild_id) || !channel.kind.is_text() {
        return Err(ServiceError::validation(
            "Pick a text channel from this server.",
        ));
    }

    let records = ctx.db.events().list_for_community(guild_id).await?;
    if records
        .iter()
        .any(|r| r.id != event_id && r.channel_id == Some(channel_id))
    {
        return Err(ServiceError::validation(
            "That channel is already linked to another event.",
        ));
    }

    match ctx
        .db
        .events()
        .insert(&EventRecord::new(event_id, guild_id).with_channel(channel_id))
        .await
    {
        Ok(()) => {
            info!(
                guild_id = %guild_id,
                event_id = %event_id,
                channel_id = %channel_id,
                "Linked existing channel"
            );
            Ok(())
        }
        // Double-clicked, or the event was provisioned meanwhile.
        Err(e) if e.is_unique_conflict() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// What finishing the sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishSummary {
    pub channels: usize,
    pub members: usize,
    pub roles_created: usize,
    pub sweep: ReconcileReport,
}

impl FinishSummary {
    pub fn message(&self) -> String {
        format!(
            "Initial sync complete. {} linked channel(s) are now private, {} interested member(s) \
             were given access, and {} new event channel(s) were created.",
            self.channels, self.members, self.sweep.created
        )
    }
}

/// Lock down every linked channel, grant existing interest, mark the sync
/// done, and sweep so unlinked events get fresh channels.
pub async fn finish(ctx: &Context, guild_id: Snowflake) -> ServiceResult<FinishSummary> {
    configured_community(ctx, guild_id).await?;
    let provisioner = Provisioner::new(ctx);
    let membership = Membership::new(ctx);
    let everyone = provisioner.everyone_role(guild_id).await?;
    let names: HashMap<Snowflake, String> = live_events(ctx, guild_id)
        .await?
        .into_iter()
        .map(|e| (e.id, e.name))
        .collect();

    let mut summary = FinishSummary::default();
    for mut record in ctx.db.events().list_for_community(guild_id).await? {
        let Some(channel_id) = record.channel_id else {
            continue;
        };

        if ctx.settings.membership_mode == MembershipMode::SharedRole && record.role_id.is_none() {
            let name = match names.get(&record.id) {
                Some(name) => channel_slug(name),
                None => ctx.platform.get_channel(channel_id).await?.name,
            };
            let role = ctx
                .platform
                .create_role(guild_id, &RoleSpec::plain(name, ctx.settings.role_color))
                .await?;
            ctx.db.events().set_role(record.id, Some(role.id)).await?;
            record.role_id = Some(role.id);
            summary.roles_created += 1;
        }

        provisioner
            .apply_visibility(channel_id, everyone, record.role_id)
            .await?;
        summary.channels += 1;
        summary.members += membership.grant_interested(&record).await?;
    }

    ctx.db
        .communities()
        .update(
            guild_id,
            &CommunityUpdate {
                initial_sync_completed: Some(true),
                ..CommunityUpdate::default()
            },
        )
        .await?;
    info!(guild_id = %guild_id, channels = summary.channels, "Initial sync completed");

    summary.sweep = match Reconciler::new(ctx).reconcile_community(guild_id).await {
        Ok(report) => report,
        Err(e) => {
            warn!(guild_id = %guild_id, error = %e, "Post-sync sweep failed");
            ReconcileReport::default()
        }
    };
    summary.members += summary.sweep.granted;
    Ok(summary)
}
