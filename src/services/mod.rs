//! Controller services.
//!
//! Each service is a thin struct borrowing the shared [`Context`]; all state
//! lives in the database and on the platform, so services are re-created per
//! notification and re-read everything they act on.

pub mod command;
pub mod lifecycle;
pub mod membership;
pub mod provision;
pub mod reconcile;

pub use lifecycle::{Lifecycle, LifecycleOutcome, Transition, Trigger, plan_transition};
pub use membership::{Membership, MembershipOutcome};
pub use provision::{Compensation, Provisioned, Provisioner};
pub use reconcile::{ReconcileReport, Reconciler};

use crate::config::{Config, MembershipMode};
use crate::db::{CommunityRecord, Database};
use crate::error::ServiceResult;
use crate::platform::{BotIdentity, Platform};
use evchan_proto::{Guild, Snowflake};
use std::sync::Arc;
use std::time::Duration;

/// Deployment-time behaviour shared by every service.
#[derive(Debug, Clone)]
pub struct Settings {
    pub membership_mode: MembershipMode,
    pub role_color: u32,
    pub default_announce_message: String,
    pub lookup_attempts: u32,
    pub lookup_interval: Duration,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            membership_mode: config.bot.membership_mode,
            role_color: config.bot.role_color,
            default_announce_message: config.bot.default_announce_message.clone(),
            lookup_attempts: config.membership.lookup_attempts,
            lookup_interval: config.membership.lookup_interval(),
        }
    }
}

/// Handles shared by all services. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    pub db: Database,
    pub platform: Arc<dyn Platform>,
    pub bot: BotIdentity,
    pub settings: Arc<Settings>,
}

impl Context {
    pub fn new(
        db: Database,
        platform: Arc<dyn Platform>,
        bot: BotIdentity,
        settings: Settings,
    ) -> Self {
        Self {
            db,
            platform,
            bot,
            settings: Arc::new(settings),
        }
    }

    /// Record a guild the first time it is seen. Returns the stored row and
    /// whether this call created it.
    pub async fn observe_community(&self, guild: &Guild) -> ServiceResult<(CommunityRecord, bool)> {
        let defaults = CommunityRecord::new(
            guild.id,
            self.settings.default_announce_message.clone(),
            guild.public_updates_channel_id,
        );
        Ok(self.db.communities().get_or_create(&defaults).await?)
    }

    /// Like [`Context::observe_community`] when only the ID is known.
    pub async fn ensure_community(&self, guild_id: Snowflake) -> ServiceResult<CommunityRecord> {
        let defaults = CommunityRecord::new(
            guild_id,
            self.settings.default_announce_message.clone(),
            None,
        );
        let (record, _) = self.db.communities().get_or_create(&defaults).await?;
        Ok(record)
    }
}
