//! Community repository: one configuration row per guild.

use super::{DbError, parse_id, parse_opt_id};
use evchan_proto::Snowflake;
use sqlx::SqlitePool;

/// Placeholder in the announcement template replaced by the event name.
pub const EVENT_PLACEHOLDER: &str = "%EVENT%";

/// A guild's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityRecord {
    pub id: Snowflake,
    pub announce_message: String,
    pub delete_when_done: bool,
    pub announce_channel_id: Option<Snowflake>,
    pub category_id: Option<Snowflake>,
    pub configuration_completed: bool,
    pub initial_sync_completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CommunityRecord {
    /// Defaults for a guild seen for the first time.
    pub fn new(
        id: Snowflake,
        announce_message: impl Into<String>,
        announce_channel_id: Option<Snowflake>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            announce_message: announce_message.into(),
            delete_when_done: false,
            announce_channel_id,
            category_id: None,
            configuration_completed: false,
            initial_sync_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an operator has configured the guild and linked its existing
    /// channels. Until then nothing is provisioned automatically.
    pub fn is_ready(&self) -> bool {
        self.configuration_completed && self.initial_sync_completed
    }

    /// Announcement text for a new event channel.
    pub fn announcement(&self, event_name: &str, invite_url: &str) -> String {
        format!(
            "{}\n{}",
            self.announce_message.replace(EVENT_PLACEHOLDER, event_name),
            invite_url
        )
    }
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommunityUpdate {
    pub announce_message: Option<String>,
    pub delete_when_done: Option<bool>,
    pub announce_channel_id: Option<Snowflake>,
    pub category_id: Option<Snowflake>,
    pub configuration_completed: Option<bool>,
    pub initial_sync_completed: Option<bool>,
}

impl CommunityUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

type CommunityRow = (
    String,
    String,
    bool,
    Option<String>,
    Option<String>,
    bool,
    bool,
    i64,
    i64,
);

fn from_row(row: CommunityRow) -> Result<CommunityRecord, DbError> {
    let (
        id,
        announce_message,
        delete_when_done,
        announce_channel_id,
        category_id,
        configuration_completed,
        initial_sync_completed,
        created_at,
        updated_at,
    ) = row;
    Ok(CommunityRecord {
        id: parse_id("communities.id", id)?,
        announce_message,
        delete_when_done,
        announce_channel_id: parse_opt_id("communities.announce_channel_id", announce_channel_id)?,
        category_id: parse_opt_id("communities.category_id", category_id)?,
        configuration_completed,
        initial_sync_completed,
        created_at,
        updated_at,
    })
}

/// Repository for community operations.
pub struct CommunityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CommunityRepository<'a> {
    /// Create a new community repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Find a community by guild ID.
    pub async fn find(&self, id: Snowflake) -> Result<Option<CommunityRecord>, DbError> {
        let row = sqlx::query_as::<_, CommunityRow>(
            r#"
            SELECT id, announce_message, delete_when_done, announce_channel_id, category_id,
                   configuration_completed, initial_sync_completed, created_at, updated_at
            FROM communities
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(self.pool)
        .await?;

        row.map(from_row).transpose()
    }

    /// Insert a new community. Fails with [`DbError::UniqueConflict`] if the
    /// guild already has a row.
    pub async fn insert(&self, record: &CommunityRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO communities
            (id, announce_message, delete_when_done, announce_channel_id, category_id,
             configuration_completed, initial_sync_completed, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.announce_message)
        .bind(record.delete_when_done)
        .bind(record.announce_channel_id.map(|id| id.to_string()))
        .bind(record.category_id.map(|id| id.to_string()))
        .bind(record.configuration_completed)
        .bind(record.initial_sync_completed)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, || format!("community {}", record.id)))?;
        Ok(())
    }

    /// Insert `defaults` unless the guild already has a row, in which case the
    /// stored row is returned. The flag is `true` when this call created it.
    pub async fn get_or_create(
        &self,
        defaults: &CommunityRecord,
    ) -> Result<(CommunityRecord, bool), DbError> {
        match self.insert(defaults).await {
            Ok(()) => Ok((defaults.clone(), true)),
            Err(DbError::UniqueConflict(_)) => {
                let existing = self.find(defaults.id).await?.ok_or_else(|| {
                    DbError::Internal(format!(
                        "community {} conflicted on insert but is missing",
                        defaults.id
                    ))
                })?;
                Ok((existing, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a partial update. Returns `false` when the guild has no row.
    pub async fn update(&self, id: Snowflake, update: &CommunityUpdate) -> Result<bool, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE communities SET
                announce_message = COALESCE(?, announce_message),
                delete_when_done = COALESCE(?, delete_when_done),
                announce_channel_id = COALESCE(?, announce_channel_id),
                category_id = COALESCE(?, category_id),
                configuration_completed = COALESCE(?, configuration_completed),
                initial_sync_completed = COALESCE(?, initial_sync_completed),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.announce_message.as_deref())
        .bind(update.delete_when_done)
        .bind(update.announce_channel_id.map(|id| id.to_string()))
        .bind(update.category_id.map(|id| id.to_string()))
        .bind(update.configuration_completed)
        .bind(update.initial_sync_completed)
        .bind(now)
        .bind(id.to_string())
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a community and, through the foreign key, its events.
    pub async fn delete(&self, id: Snowflake) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM communities WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every known community.
    pub async fn list_all(&self) -> Result<Vec<CommunityRecord>, DbError> {
        let rows = sqlx::query_as::<_, CommunityRow>(
            r#"
            SELECT id, announce_message, delete_when_done, announce_channel_id, category_id,
                   configuration_completed, initial_sync_completed, created_at, updated_at
            FROM communities
            ORDER BY id
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }
}
