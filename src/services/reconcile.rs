//! Full diff-and-repair of one community against live platform state.
//!
//! The sweep is what makes the controller durable: notifications can be
//! lost or fail halfway, and the next sweep notices the divergence from the
//! stored records and fixes it. Running it twice in a row is a no-op.

use super::Context;
use super::lifecycle::{Lifecycle, LifecycleOutcome};
use super::membership::Membership;
use super::provision::Provisioner;
use crate::db::{CommunityRecord, EventRecord};
use crate::error::ServiceResult;
use crate::metrics;
use crate::telemetry::spans;
use evchan_proto::{Channel, ScheduledEvent, Snowflake, channel_slug};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Counters from one community pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// The community has not finished setup; nothing was touched.
    pub skipped: bool,
    pub created: usize,
    pub relinked: usize,
    pub repaired: usize,
    pub renamed: usize,
    pub unlinked: usize,
    pub removed: usize,
    /// Already-interested members given access to new channels.
    pub granted: usize,
    pub failures: usize,
}

impl ReconcileReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Metric label for the pass.
    pub fn outcome(&self) -> &'static str {
        if self.skipped {
            "skipped"
        } else if self.failures > 0 {
            "partial"
        } else {
            "ok"
        }
    }

    pub fn changed(&self) -> bool {
        self.created
            + self.relinked
            + self.repaired
            + self.renamed
            + self.unlinked
            + self.removed
            + self.granted
            > 0
    }
}

/// Live text channels, by ID and by name.
struct ChannelIndex {
    by_id: HashMap<Snowflake, Channel>,
    by_name: HashMap<String, Snowflake>,
}

impl ChannelIndex {
    fn new(channels: Vec<Channel>) -> Self {
        let mut by_id = HashMap::with_capacity(channels.len());
        let mut by_name = HashMap::with_capacity(channels.len());
        for channel in channels.into_iter().filter(|c| c.kind.is_text()) {
            by_name.entry(channel.name.clone()).or_insert(channel.id);
            by_id.insert(channel.id, channel);
        }
        Self { by_id, by_name }
    }
}

pub struct Reconciler<'a> {
    ctx: &'a Context,
}

impl<'a> Reconciler<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Reconcile one community, recording the outcome metric.
    pub async fn reconcile_community(&self, guild_id: Snowflake) -> ServiceResult<ReconcileReport> {
        let result = self.run(guild_id).await;
        match &result {
            Ok(report) => {
                metrics::record_reconcile(report.outcome());
                if report.changed() || report.failures > 0 {
                    info!(guild_id = %guild_id, ?report, "Reconciled community");
                } else {
                    debug!(guild_id = %guild_id, "Community already in sync");
                }
            }
            Err(e) => {
                metrics::record_reconcile("error");
                warn!(guild_id = %guild_id, error = %e, "Reconciliation failed");
            }
        }
        result
    }

    async fn run(&self, guild_id: Snowflake) -> ServiceResult<ReconcileReport> {
        let Some(community) = self.ctx.db.communities().find(guild_id).await? else {
            return Ok(ReconcileReport::skipped());
        };
        if !community.is_ready() {
            return Ok(ReconcileReport::skipped());
        }

        let mut records: BTreeMap<Snowflake, EventRecord> = self
            .ctx
            .db
            .events()
            .list_for_community(guild_id)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let channels = ChannelIndex::new(self.ctx.platform.list_channels(guild_id).await?);
        let live: Vec<ScheduledEvent> = self
            .ctx
            .platform
            .list_scheduled_events(guild_id)
            .await?
            .into_iter()
            .filter(|e| !e.status.is_terminal())
            .collect();

        let mut linked: HashSet<Snowflake> =
            records.values().filter_map(|r| r.channel_id).collect();
        let mut report = ReconcileReport::default();

        for event in &live {
            let Some(record) = records.remove(&event.id) else {
                match Lifecycle::new(self.ctx).create(event).await {
                    Ok(LifecycleOutcome::Created(record)) => {
                        linked.extend(record.channel_id);
                        report.created += 1;
                        self.grant_existing_interest(&record, &mut report).await;
                    }
                    Ok(outcome) => debug!(event_id = %event.id, ?outcome, "Create not applied"),
                    Err(e) => {
                        warn!(event_id = %event.id, error = %e, "Failed to create event channel");
                        report.failures += 1;
                    }
                }
                continue;
            };

            if let Err(e) = self
                .repair(&community, event, record, &channels, &mut linked, &mut report)
                .await
            {
                warn!(event_id = %event.id, error = %e, "Failed to repair event channel");
                report.failures += 1;
            }
        }

        for record in records.into_values() {
            match Provisioner::new(self.ctx)
                .deprovision(&community, &record, None)
                .await
            {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(event_id = %record.id, error = %e, "Failed to clean up orphaned event");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn repair(
        &self,
        community: &CommunityRecord,
        event: &ScheduledEvent,
        record: EventRecord,
        channels: &ChannelIndex,
        linked: &mut HashSet<Snowflake>,
        report: &mut ReconcileReport,
    ) -> ServiceResult<()> {
        let slug = channel_slug(&event.name);
        let events = self.ctx.db.events();

        let Some(channel_id) = record.channel_id else {
            let candidate = channels
                .by_name
                .get(&slug)
                .copied()
                .filter(|id| !linked.contains(id));
            match candidate {
                Some(channel_id) => {
                    events.set_channel(record.id, Some(channel_id)).await?;
                    info!(event_id = %record.id, channel_id = %channel_id, "Relinked event to existing channel");
                    report.relinked += 1;
                    linked.insert(channel_id);
                }
                None => {
                    let channel_id = Provisioner::new(self.ctx)
                        .provision_channel(community, &event.name, record.role_id)
                        .await?;
                    if let Err(e) = events.set_channel(record.id, Some(channel_id)).await {
                        discard_channel(self.ctx, channel_id).await;
                        return Err(e.into());
                    }
                    info!(event_id = %record.id, channel_id = %channel_id, "Recreated event channel");
                    report.repaired += 1;
                    linked.insert(channel_id);
                    let record = EventRecord {
                        channel_id: Some(channel_id),
                        ..record
                    };
                    self.grant_existing_interest(&record, report).await;
                }
            }
            return Ok(());
        };

        let Some(channel) = channels.by_id.get(&channel_id) else {
            warn!(
                event_id = %record.id,
                channel_id = %channel_id,
                "Linked channel was deleted, unlinking until next pass"
            );
            events.set_channel(record.id, None).await?;
            report.unlinked += 1;
            return Ok(());
        };

        if channel.name != slug {
            match Lifecycle::new(self.ctx).rename(&record, &event.name).await? {
                LifecycleOutcome::Renamed => report.renamed += 1,
                LifecycleOutcome::ChannelMissing => report.unlinked += 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// New channels start hidden, so members who marked interest before the
    /// channel existed are granted here.
    async fn grant_existing_interest(&self, record: &EventRecord, report: &mut ReconcileReport) {
        match Membership::new(self.ctx).grant_interested(record).await {
            Ok(granted) => report.granted += granted,
            Err(e) => {
                warn!(event_id = %record.id, error = %e, "Failed to grant existing interest");
                report.failures += 1;
            }
        }
    }
}

async fn discard_channel(ctx: &Context, channel_id: Snowflake) {
    if let Err(e) = ctx.platform.delete_channel(channel_id).await
        && !e.is_not_found()
    {
        warn!(channel_id = %channel_id, error = %e, "Failed to remove unrecorded channel");
    }
}

/// Reconcile every stored community, one at a time.
pub async fn reconcile_all(ctx: &Context) {
    let communities = match ctx.db.communities().list_all().await {
        Ok(communities) => communities,
        Err(e) => {
            error!(error = %e, "Failed to list communities for sweep");
            return;
        }
    };

    let reconciler = Reconciler::new(ctx);
    for community in communities {
        let _ = reconciler
            .reconcile_community(community.id)
            .instrument(spans::reconcile(community.id))
            .await;
    }
}

/// Spawn the periodic sweep. The first pass happens one interval after
/// start; the gateway's Ready already triggers an immediate one.
pub fn spawn_sweep_task(
    ctx: Context,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    debug!("Periodic sweep starting");
                    reconcile_all(&ctx).await;
                }
            }
        }
        info!("Sweep task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CommunityUpdate;
    use crate::platform::fake::Fault;
    use crate::services::testing::*;
    use evchan_proto::{ChannelKind, EventStatus, Permissions};

    #[tokio::test]
    async fn skips_unconfigured_community() {
        let (ctx, fake) = context().await;
        ctx.ensure_community(GUILD).await.unwrap();
        fake.add_event(GUILD, Snowflake::new(1), "Board Games");

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert!(report.skipped);
        assert_eq!(fake.count("list_scheduled_events"), 0);
    }

    #[tokio::test]
    async fn converges_and_is_idempotent() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        for (id, name) in [(1, "Board Games"), (2, "Movie Night"), (3, "Raid  Night")] {
            fake.add_event(GUILD, Snowflake::new(id), name);
        }

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.created, 3);
        assert_eq!(report.failures, 0);

        let records = ctx.db.events().list_for_community(GUILD).await.unwrap();
        assert_eq!(records.len(), 3);
        for (record, slug) in records.iter().zip(["board-games", "movie-night", "raid-night"]) {
            assert_eq!(fake.channel(record.channel_id.unwrap()).unwrap().name, slug);
        }

        let again = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert!(!again.changed());
        assert_eq!(fake.count("create_channel"), 3);
    }

    #[tokio::test]
    async fn new_channels_admit_existing_interest() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        let ev = fake.add_event(GUILD, Snowflake::new(1), "Board Games");
        fake.add_interested(ev.id, Snowflake::new(7001));
        fake.add_interested(ev.id, crate::platform::fake::BOT_USER);

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.granted, 1);

        let channel = fake.channel_named("board-games").unwrap();
        assert!(channel.permission_overwrites.iter().any(|o| {
            o.id == Snowflake::new(7001) && o.allow.contains(Permissions::VIEW_CHANNEL)
        }));

        // A recreated channel is also opened to them again.
        fake.drop_channel(channel.id);
        Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(report.granted, 1);
        let recreated = fake.channel_named("board-games").unwrap();
        assert_ne!(recreated.id, channel.id);
        assert!(
            recreated
                .permission_overwrites
                .iter()
                .any(|o| o.id == Snowflake::new(7001))
        );
    }

    #[tokio::test]
    async fn orphan_is_archived_and_forgotten() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        fake.add_event(GUILD, Snowflake::new(1), "Board Games");
        Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        fake.remove_event(GUILD, Snowflake::new(1));

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(fake.channel_named("done-board-games").is_some());
        assert_eq!(fake.count("delete_channel"), 0);
        assert!(ctx.db.events().find(Snowflake::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn orphan_is_deleted_when_configured() {
        let (ctx, fake) = context().await;
        ready_community(
            &ctx,
            CommunityUpdate {
                delete_when_done: Some(true),
                ..Default::default()
            },
        )
        .await;
        let channel = fake.add_channel(GUILD, "board-games", ChannelKind::GuildText);
        ctx.db
            .events()
            .insert(&EventRecord::new(Snowflake::new(9), GUILD).with_channel(channel))
            .await
            .unwrap();

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(fake.channel(channel).is_none());
        assert_eq!(fake.count("edit_channel"), 0);
    }

    #[tokio::test]
    async fn terminal_live_events_are_orphans() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        let channel = fake.add_channel(GUILD, "old-raid", ChannelKind::GuildText);
        let ev = fake.add_event(GUILD, Snowflake::new(4), "Old Raid");
        ctx.db
            .events()
            .insert(&EventRecord::new(ev.id, GUILD).with_channel(channel))
            .await
            .unwrap();
        fake.set_event_status(GUILD, ev.id, EventStatus::Completed);

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.created, 0);
        assert_eq!(fake.channel(channel).unwrap().name, "done-old-raid");
    }

    #[tokio::test]
    async fn relinks_unlinked_record_by_slug() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        fake.add_event(GUILD, Snowflake::new(1), "Board Games");
        let existing = fake.add_channel(GUILD, "board-games", ChannelKind::GuildText);
        ctx.db
            .events()
            .insert(&EventRecord::new(Snowflake::new(1), GUILD))
            .await
            .unwrap();

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.relinked, 1);
        assert_eq!(fake.count("create_channel"), 0);
        let record = ctx.db.events().find(Snowflake::new(1)).await.unwrap().unwrap();
        assert_eq!(record.channel_id, Some(existing));
    }

    #[tokio::test]
    async fn deleted_channel_is_unlinked_then_recreated() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        fake.add_event(GUILD, Snowflake::new(1), "Board Games");
        Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        let first = ctx.db.events().find(Snowflake::new(1)).await.unwrap().unwrap();
        fake.drop_channel(first.channel_id.unwrap());

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.unlinked, 1);

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.repaired, 1);
        let second = ctx.db.events().find(Snowflake::new(1)).await.unwrap().unwrap();
        assert_ne!(second.channel_id, first.channel_id);
        assert_eq!(
            fake.channel(second.channel_id.unwrap()).unwrap().name,
            "board-games"
        );
    }

    #[tokio::test]
    async fn renames_drifted_channel() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        fake.add_event(GUILD, Snowflake::new(1), "Board Games");
        Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        fake.rename_event(GUILD, Snowflake::new(1), "Card Games");

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.renamed, 1);
        assert!(fake.channel_named("card-games").is_some());
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_pass() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        fake.add_event(GUILD, Snowflake::new(1), "Board Games");
        fake.add_event(GUILD, Snowflake::new(2), "Movie Night");
        fake.fail_next("create_channel", Fault::Transient);

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.outcome(), "partial");

        let report = Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(ctx.db.events().list_for_community(GUILD).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn board_games_end_to_end() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        let ev = fake.add_event(GUILD, Snowflake::new(1), "Board Games");

        Reconciler::new(&ctx).reconcile_community(GUILD).await.unwrap();
        let record = ctx.db.events().find(ev.id).await.unwrap().unwrap();
        let channel_id = record.channel_id.unwrap();
        assert_eq!(fake.channel(channel_id).unwrap().name, "board-games");

        let mut canceled = ev.clone();
        canceled.status = EventStatus::Canceled;
        Lifecycle::new(&ctx)
            .handle(crate::services::Trigger::Updated, &canceled)
            .await
            .unwrap();

        assert_eq!(fake.channel(channel_id).unwrap().name, "done-board-games");
        assert!(ctx.db.events().find(ev.id).await.unwrap().is_none());
    }
}
