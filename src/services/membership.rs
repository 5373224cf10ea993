//! Granting and revoking one member's access to an event channel.

use super::Context;
use crate::config::MembershipMode;
use crate::db::EventRecord;
use crate::error::ServiceResult;
use crate::platform::{ignore_not_found, overwrite};
use evchan_proto::{EventUserChange, OverwriteKind, Permissions, Snowflake};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interested users fetched per page.
const INTEREST_PAGE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOutcome {
    Granted,
    Revoked,
    /// The event was never recorded within the lookup window.
    Abandoned,
    Ignored(&'static str),
}

pub struct Membership<'a> {
    ctx: &'a Context,
}

impl<'a> Membership<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// A member marked themselves interested.
    ///
    /// The interest notification can beat the creation notification for the
    /// same event, so the record lookup is polled a bounded number of times.
    pub async fn add(&self, change: &EventUserChange) -> ServiceResult<MembershipOutcome> {
        if change.user_id == self.ctx.bot.user_id {
            return Ok(MembershipOutcome::Ignored("bot user"));
        }

        let Some(record) = self.wait_for_record(change.guild_scheduled_event_id).await? else {
            warn!(
                guild_id = %change.guild_id,
                event_id = %change.guild_scheduled_event_id,
                user_id = %change.user_id,
                attempts = self.ctx.settings.lookup_attempts,
                "No record for event, giving up on interest"
            );
            return Ok(MembershipOutcome::Abandoned);
        };
        if let Some(outcome) = foreign_guild(&record, change) {
            return Ok(outcome);
        }

        match self.grant(&record, change.user_id).await? {
            true => {
                info!(
                    event_id = %record.id,
                    user_id = %change.user_id,
                    "Granted event channel access"
                );
                Ok(MembershipOutcome::Granted)
            }
            false => Ok(MembershipOutcome::Ignored("no channel linked")),
        }
    }

    /// A member removed their interest.
    pub async fn remove(&self, change: &EventUserChange) -> ServiceResult<MembershipOutcome> {
        if change.user_id == self.ctx.bot.user_id {
            return Ok(MembershipOutcome::Ignored("bot user"));
        }

        let Some(record) = self
            .ctx
            .db
            .events()
            .find(change.guild_scheduled_event_id)
            .await?
        else {
            info!(
                event_id = %change.guild_scheduled_event_id,
                user_id = %change.user_id,
                "Interest removed for unrecorded event"
            );
            return Ok(MembershipOutcome::Ignored("no record"));
        };
        if let Some(outcome) = foreign_guild(&record, change) {
            return Ok(outcome);
        }

        match self.revoke(&record, change.user_id).await? {
            true => {
                info!(
                    event_id = %record.id,
                    user_id = %change.user_id,
                    "Revoked event channel access"
                );
                Ok(MembershipOutcome::Revoked)
            }
            false => Ok(MembershipOutcome::Ignored("no channel linked")),
        }
    }

    async fn wait_for_record(&self, event_id: Snowflake) -> ServiceResult<Option<EventRecord>> {
        let settings = &self.ctx.settings;
        poll_bounded(settings.lookup_attempts, settings.lookup_interval, |attempt| async move {
            let found = self.ctx.db.events().find(event_id).await?;
            if found.is_none() {
                debug!(event_id = %event_id, attempt, "Event not recorded yet");
            }
            Ok(found)
        })
        .await
    }

    /// Give `user_id` access to the record's channel. Returns `false` when
    /// the record has no channel to grant.
    pub async fn grant(&self, record: &EventRecord, user_id: Snowflake) -> ServiceResult<bool> {
        let Some(channel_id) = record.channel_id else {
            return Ok(false);
        };
        match (self.ctx.settings.membership_mode, record.role_id) {
            (MembershipMode::SharedRole, Some(role_id)) => {
                self.ctx
                    .platform
                    .add_member_role(record.community_id, user_id, role_id)
                    .await?;
            }
            _ => {
                self.ctx
                    .platform
                    .set_permission_overwrite(
                        channel_id,
                        &overwrite(
                            user_id,
                            OverwriteKind::Member,
                            Permissions::EVENT_MEMBER,
                            Permissions::NONE,
                        ),
                    )
                    .await?;
            }
        }
        Ok(true)
    }

    /// Grant everyone already interested in the record's event, paging
    /// through the interest list. Returns how many members were granted.
    pub async fn grant_interested(&self, record: &EventRecord) -> ServiceResult<usize> {
        if record.channel_id.is_none() {
            return Ok(0);
        }
        let mut granted = 0;
        let mut after = None;
        loop {
            let page = self
                .ctx
                .platform
                .list_interested_users(record.community_id, record.id, INTEREST_PAGE, after)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.user.id);

            for user in page.iter().filter(|u| u.user.id != self.ctx.bot.user_id) {
                if self.grant(record, user.user.id).await? {
                    granted += 1;
                }
            }
            if page.len() < INTEREST_PAGE as usize {
                break;
            }
        }
        Ok(granted)
    }

    async fn revoke(&self, record: &EventRecord, user_id: Snowflake) -> ServiceResult<bool> {
        let Some(channel_id) = record.channel_id else {
            return Ok(false);
        };
        let result = match (self.ctx.settings.membership_mode, record.role_id) {
            (MembershipMode::SharedRole, Some(role_id)) => {
                self.ctx
                    .platform
                    .remove_member_role(record.community_id, user_id, role_id)
                    .await
            }
            _ => {
                self.ctx
                    .platform
                    .clear_permission_overwrite(channel_id, user_id)
                    .await
            }
        };
        ignore_not_found(result)?;
        Ok(true)
    }
}

fn foreign_guild(record: &EventRecord, change: &EventUserChange) -> Option<MembershipOutcome> {
    if record.community_id == change.guild_id {
        return None;
    }
    warn!(
        guild_id = %change.guild_id,
        event_id = %record.id,
        recorded_guild_id = %record.community_id,
        "Interest change names a different guild than the record"
    );
    Some(MembershipOutcome::Ignored("guild mismatch"))
}

/// Run `lookup` up to `attempts` times, `interval` apart, until it yields a value.
async fn poll_bounded<T, F, Fut>(
    attempts: u32,
    interval: Duration,
    mut lookup: F,
) -> ServiceResult<Option<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ServiceResult<Option<T>>>,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(found) = lookup(attempt).await? {
            return Ok(Some(found));
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CommunityUpdate;
    use crate::platform::fake::BOT_USER;
    use crate::services::testing::*;
    use crate::services::Settings;
    use evchan_proto::ChannelKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    const USER: Snowflake = Snowflake::new(7000);

    fn change(event: u64, user: Snowflake) -> EventUserChange {
        EventUserChange {
            guild_scheduled_event_id: Snowflake::new(event),
            user_id: user,
            guild_id: GUILD,
        }
    }

    async fn recorded(ctx: &Context, fake: &crate::platform::fake::FakePlatform) -> EventRecord {
        ready_community(ctx, CommunityUpdate::default()).await;
        let channel = fake.add_channel(GUILD, "board-games", ChannelKind::GuildText);
        let record = EventRecord::new(Snowflake::new(1), GUILD).with_channel(channel);
        ctx.db.events().insert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn grant_and_revoke_member_overwrite() {
        let (ctx, fake) = context().await;
        let record = recorded(&ctx, &fake).await;
        let membership = Membership::new(&ctx);
        let channel_id = record.channel_id.unwrap();

        assert_eq!(
            membership.add(&change(1, USER)).await.unwrap(),
            MembershipOutcome::Granted
        );
        let overwrites = fake.channel(channel_id).unwrap().permission_overwrites;
        let member = overwrites.iter().find(|o| o.id == USER).unwrap();
        assert_eq!(member.kind, OverwriteKind::Member);
        assert!(member.allow.contains(Permissions::VIEW_CHANNEL));

        assert_eq!(
            membership.remove(&change(1, USER)).await.unwrap(),
            MembershipOutcome::Revoked
        );
        let overwrites = fake.channel(channel_id).unwrap().permission_overwrites;
        assert!(overwrites.iter().all(|o| o.id != USER));
    }

    #[tokio::test]
    async fn shared_role_mode_uses_role() {
        let (ctx, fake) = context_with(MembershipMode::SharedRole).await;
        ready_community(&ctx, CommunityUpdate::default()).await;
        let channel = fake.add_channel(GUILD, "board-games", ChannelKind::GuildText);
        let role = Snowflake::new(4242);
        ctx.db
            .events()
            .insert(
                &EventRecord::new(Snowflake::new(1), GUILD)
                    .with_channel(channel)
                    .with_role(Some(role)),
            )
            .await
            .unwrap();
        let membership = Membership::new(&ctx);

        membership.add(&change(1, USER)).await.unwrap();
        assert!(fake.has_member_role(GUILD, USER, role));
        assert_eq!(fake.count("set_permission_overwrite"), 0);

        membership.remove(&change(1, USER)).await.unwrap();
        assert!(!fake.has_member_role(GUILD, USER, role));
    }

    #[tokio::test]
    async fn other_guild_cannot_touch_record() {
        let (ctx, fake) = context().await;
        recorded(&ctx, &fake).await;
        let foreign = EventUserChange {
            guild_id: Snowflake::new(999),
            ..change(1, USER)
        };
        let membership = Membership::new(&ctx);

        assert_eq!(
            membership.add(&foreign).await.unwrap(),
            MembershipOutcome::Ignored("guild mismatch")
        );
        assert_eq!(
            membership.remove(&foreign).await.unwrap(),
            MembershipOutcome::Ignored("guild mismatch")
        );
        assert_eq!(fake.count("set_permission_overwrite"), 0);
        assert_eq!(fake.count("clear_permission_overwrite"), 0);
    }

    #[tokio::test]
    async fn bot_user_is_ignored() {
        let (ctx, fake) = context().await;
        recorded(&ctx, &fake).await;

        let outcome = Membership::new(&ctx).add(&change(1, BOT_USER)).await.unwrap();
        assert!(matches!(outcome, MembershipOutcome::Ignored(_)));
        assert_eq!(fake.count("set_permission_overwrite"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let found: Option<()> = poll_bounded(5, Duration::from_secs(1), |_| {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Ok(None) }
        })
        .await
        .unwrap();

        assert!(found.is_none());
        assert_eq!(calls.load(Ordering::Relaxed), 5);
        // Four waits between five lookups.
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stops_at_first_hit() {
        let found = poll_bounded(5, Duration::from_secs(1), |attempt| async move {
            Ok((attempt == 3).then_some(attempt))
        })
        .await
        .unwrap();
        assert_eq!(found, Some(3));
    }

    fn fast(ctx: Context) -> Context {
        let settings = Settings {
            lookup_interval: Duration::from_millis(20),
            ..(*ctx.settings).clone()
        };
        Context {
            settings: Arc::new(settings),
            ..ctx
        }
    }

    #[tokio::test]
    async fn missing_record_is_abandoned() {
        let (ctx, fake) = context().await;
        let ctx = fast(ctx);
        ready_community(&ctx, CommunityUpdate::default()).await;

        let outcome = Membership::new(&ctx).add(&change(1, USER)).await.unwrap();
        assert_eq!(outcome, MembershipOutcome::Abandoned);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn late_record_is_found() {
        let (ctx, fake) = context().await;
        let ctx = fast(ctx);
        ready_community(&ctx, CommunityUpdate::default()).await;
        let channel = fake.add_channel(GUILD, "board-games", ChannelKind::GuildText);

        let writer = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                ctx.db
                    .events()
                    .insert(&EventRecord::new(Snowflake::new(1), GUILD).with_channel(channel))
                    .await
                    .unwrap();
            })
        };

        let outcome = Membership::new(&ctx).add(&change(1, USER)).await.unwrap();
        writer.await.unwrap();
        assert_eq!(outcome, MembershipOutcome::Granted);
    }

    #[tokio::test]
    async fn removal_without_record_is_ignored() {
        let (ctx, fake) = context().await;
        ready_community(&ctx, CommunityUpdate::default()).await;

        let outcome = Membership::new(&ctx).remove(&change(1, USER)).await.unwrap();
        assert!(matches!(outcome, MembershipOutcome::Ignored(_)));
        assert!(fake.calls().is_empty());
    }
}
