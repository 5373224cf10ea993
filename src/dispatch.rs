//! Routing of inbound notifications to services.
//!
//! Every notification becomes its own task. Handlers share nothing but the
//! [`Context`], reload what they need, and treat "already done" as success,
//! so tasks for the same event may run in any order.

use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::services::command::{CommandHandler, CommandSchema};
use crate::services::reconcile::reconcile_all;
use crate::services::{Context, Lifecycle, Membership, Reconciler, Trigger};
use crate::telemetry::{HandlerTimer, correlation_id, spans};
use evchan_proto::{
    EventUserChange, GatewayEvent, Guild, Interaction, InteractionKind, ScheduledEvent, Snowflake,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, warn};

/// Everything the controller reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A gateway session started.
    Ready { guild_ids: Vec<Snowflake> },
    /// The bot joined a guild or it became available.
    CommunityObserved(Guild),
    /// The bot left or was removed from a guild.
    CommunityRemoved { guild_id: Snowflake },
    EventCreated(ScheduledEvent),
    EventUpdated(ScheduledEvent),
    EventDeleted(ScheduledEvent),
    InterestAdded(EventUserChange),
    InterestRemoved(EventUserChange),
    CommandInvoked(Box<Interaction>),
    ComponentInvoked(Box<Interaction>),
}

impl Notification {
    /// Metric and span label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::CommunityObserved(_) => "community_observed",
            Self::CommunityRemoved { .. } => "community_removed",
            Self::EventCreated(_) => "event_created",
            Self::EventUpdated(_) => "event_updated",
            Self::EventDeleted(_) => "event_deleted",
            Self::InterestAdded(_) => "interest_added",
            Self::InterestRemoved(_) => "interest_removed",
            Self::CommandInvoked(_) => "command",
            Self::ComponentInvoked(_) => "component",
        }
    }

    /// Map a decoded dispatch to a notification, if it is one we act on.
    pub fn from_gateway(event: GatewayEvent) -> Option<Self> {
        Some(match event {
            GatewayEvent::Ready(ready) => Self::Ready {
                guild_ids: ready.guilds.iter().map(|g| g.id).collect(),
            },
            GatewayEvent::GuildCreate(guild) => Self::CommunityObserved(guild),
            // An outage, not a removal; the guild comes back with GUILD_CREATE.
            GatewayEvent::GuildDelete(guild) if guild.unavailable == Some(true) => return None,
            GatewayEvent::GuildDelete(guild) => Self::CommunityRemoved { guild_id: guild.id },
            GatewayEvent::ScheduledEventCreate(event) => Self::EventCreated(event),
            GatewayEvent::ScheduledEventUpdate(event) => Self::EventUpdated(event),
            GatewayEvent::ScheduledEventDelete(event) => Self::EventDeleted(event),
            GatewayEvent::ScheduledEventUserAdd(change) => Self::InterestAdded(change),
            GatewayEvent::ScheduledEventUserRemove(change) => Self::InterestRemoved(change),
            GatewayEvent::InteractionCreate(interaction) => match interaction.kind {
                InteractionKind::ApplicationCommand => Self::CommandInvoked(interaction),
                InteractionKind::MessageComponent => Self::ComponentInvoked(interaction),
                _ => return None,
            },
            GatewayEvent::Other(_) => return None,
        })
    }
}

/// Spawns one tracked task per notification.
pub struct Dispatcher {
    ctx: Context,
    schema: Arc<CommandSchema>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(ctx: Context, schema: Arc<CommandSchema>, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            schema,
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Dispatch until shutdown or until the sender is gone, then wait for
    /// in-flight handlers.
    pub async fn run(self, mut notifications: mpsc::Receiver<Notification>) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = notifications.recv() => match next {
                    Some(notification) => self.spawn(notification),
                    None => break,
                },
            }
        }

        self.tracker.close();
        info!(in_flight = self.tracker.len(), "Dispatcher stopped, draining handlers");
        self.tracker.wait().await;
        info!("All handlers finished");
    }

    fn spawn(&self, notification: Notification) {
        let kind = notification.kind();
        metrics::record_notification(kind);
        let span = spans::notification(kind, &correlation_id());
        let ctx = self.ctx.clone();
        let schema = Arc::clone(&self.schema);

        self.tracker.spawn(
            async move {
                let _timer = HandlerTimer::new(kind);
                if let Err(e) = handle(&ctx, &schema, notification).await {
                    metrics::record_handler_error(e.error_code());
                    warn!(code = e.error_code(), error = %e, "Handler failed");
                }
            }
            .instrument(span),
        );
    }
}

/// Run the handler for one notification.
pub async fn handle(
    ctx: &Context,
    schema: &CommandSchema,
    notification: Notification,
) -> ServiceResult<()> {
    match notification {
        Notification::Ready { guild_ids } => {
            info!(guilds = guild_ids.len(), "Session ready");
            if let Err(e) = ctx
                .platform
                .register_commands(ctx.bot.application_id, schema.definitions())
                .await
            {
                let e = ServiceError::from(e);
                metrics::record_handler_error(e.error_code());
                warn!(error = %e, "Failed to register commands");
            }
            reconcile_all(ctx).await;
        }
        Notification::CommunityObserved(guild) => {
            let (_, created) = ctx.observe_community(&guild).await?;
            if created {
                info!(guild_id = %guild.id, name = %guild.name, "New community");
                Reconciler::new(ctx).reconcile_community(guild.id).await?;
            }
        }
        Notification::CommunityRemoved { guild_id } => {
            if ctx.db.communities().delete(guild_id).await? {
                info!(guild_id = %guild_id, "Community removed");
            }
        }
        Notification::EventCreated(event) => {
            let outcome = Lifecycle::new(ctx).handle(Trigger::Created, &event).await?;
            debug!(event_id = %event.id, ?outcome, "Event created");
        }
        Notification::EventUpdated(event) => {
            let outcome = Lifecycle::new(ctx).handle(Trigger::Updated, &event).await?;
            debug!(event_id = %event.id, ?outcome, "Event updated");
        }
        Notification::EventDeleted(event) => {
            let outcome = Lifecycle::new(ctx).handle(Trigger::Deleted, &event).await?;
            debug!(event_id = %event.id, ?outcome, "Event deleted");
        }
        Notification::InterestAdded(change) => {
            let outcome = Membership::new(ctx).add(&change).await?;
            debug!(event_id = %change.guild_scheduled_event_id, ?outcome, "Interest added");
        }
        Notification::InterestRemoved(change) => {
            let outcome = Membership::new(ctx).remove(&change).await?;
            debug!(event_id = %change.guild_scheduled_event_id, ?outcome, "Interest removed");
        }
        Notification::CommandInvoked(interaction) => {
            CommandHandler::new(ctx, schema)
                .handle_command(&interaction)
                .await?;
        }
        Notification::ComponentInvoked(interaction) => {
            CommandHandler::new(ctx, schema)
                .handle_component(&interaction)
                .await?;
        }
    }
    Ok(())
}
