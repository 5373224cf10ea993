//! Event repository: maps a scheduled event to the channel, role and
//! announcement created for it.

use super::{DbError, parse_id, parse_opt_id};
use evchan_proto::Snowflake;
use sqlx::SqlitePool;

/// A scheduled event's provisioned resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: Snowflake,
    pub community_id: Snowflake,
    pub channel_id: Option<Snowflake>,
    pub role_id: Option<Snowflake>,
    pub announce_channel_id: Option<Snowflake>,
    pub announce_message_id: Option<Snowflake>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl EventRecord {
    pub fn new(id: Snowflake, community_id: Snowflake) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            community_id,
            channel_id: None,
            role_id: None,
            announce_channel_id: None,
            announce_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_channel(mut self, channel_id: Snowflake) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn with_role(mut self, role_id: Option<Snowflake>) -> Self {
        self.role_id = role_id;
        self
    }

    pub fn with_announcement(mut self, channel_id: Snowflake, message_id: Snowflake) -> Self {
        self.announce_channel_id = Some(channel_id);
        self.announce_message_id = Some(message_id);
        self
    }
}

type EventRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
);

fn from_row(row: EventRow) -> Result<EventRecord, DbError> {
    let (
        id,
        community_id,
        channel_id,
        role_id,
        announce_channel_id,
        announce_message_id,
        created_at,
        updated_at,
    ) = row;
    Ok(EventRecord {
        id: parse_id("events.id", id)?,
        community_id: parse_id("events.community_id", community_id)?,
        channel_id: parse_opt_id("events.channel_id", channel_id)?,
        role_id: parse_opt_id("events.role_id", role_id)?,
        announce_channel_id: parse_opt_id("events.announce_channel_id", announce_channel_id)?,
        announce_message_id: parse_opt_id("events.announce_message_id", announce_message_id)?,
        created_at,
        updated_at,
    })
}

/// Repository for event operations.
pub struct EventRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EventRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, id: Snowflake) -> Result<Option<EventRecord>, DbError> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, community_id, channel_id, role_id, announce_channel_id,
                   announce_message_id, created_at, updated_at
            FROM events
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(self.pool)
        .await?;

        row.map(from_row).transpose()
    }

    /// Insert a new event record. A second insert for the same event fails
    /// with [`DbError::UniqueConflict`].
    pub async fn insert(&self, record: &EventRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO events
            (id, community_id, channel_id, role_id, announce_channel_id,
             announce_message_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.community_id.to_string())
        .bind(record.channel_id.map(|id| id.to_string()))
        .bind(record.role_id.map(|id| id.to_string()))
        .bind(record.announce_channel_id.map(|id| id.to_string()))
        .bind(record.announce_message_id.map(|id| id.to_string()))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, || format!("event {}", record.id)))?;
        Ok(())
    }

    /// Point the record at a channel, or clear it with `None`.
    pub async fn set_channel(
        &self,
        id: Snowflake,
        channel_id: Option<Snowflake>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE events SET channel_id = ?, updated_at = ? WHERE id = ?")
            .bind(channel_id.map(|c| c.to_string()))
            .bind(chrono::Utc::now().timestamp())
            .bind(id.to_string())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_role(&self, id: Snowflake, role_id: Option<Snowflake>) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE events SET role_id = ?, updated_at = ? WHERE id = ?")
            .bind(role_id.map(|r| r.to_string()))
            .bind(chrono::Utc::now().timestamp())
            .bind(id.to_string())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete an event record. Returns `false` if there was none.
    pub async fn delete(&self, id: Snowflake) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_community(
        &self,
        community_id: Snowflake,
    ) -> Result<Vec<EventRecord>, DbError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, community_id, channel_id, role_id, announce_channel_id,
                   announce_message_id, created_at, updated_at
            FROM events
            WHERE community_id = ?
            ORDER BY id
            "#,
        )
        .bind(community_id.to_string())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CommunityRecord, Database};

    async fn seeded() -> Database {
        let db = Database::new(":memory:").await.unwrap();
        for guild in [1u64, 2] {
            db.communities()
                .insert(&CommunityRecord::new(Snowflake::new(guild), "x", None))
                .await
                .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn insert_and_find_roundtrips_optional_columns() {
        let db = seeded().await;
        let record = EventRecord::new(Snowflake::new(10), Snowflake::new(1))
            .with_channel(Snowflake::new(20))
            .with_role(Some(Snowflake::new(30)))
            .with_announcement(Snowflake::new(40), Snowflake::new(50));
        db.events().insert(&record).await.unwrap();

        let found = db.events().find(Snowflake::new(10)).await.unwrap().unwrap();
        assert_eq!(found, record);
    }

    #[tokio::test]
    async fn second_insert_conflicts() {
        let db = seeded().await;
        let record = EventRecord::new(Snowflake::new(10), Snowflake::new(1));
        db.events().insert(&record).await.unwrap();
        assert!(db.events().insert(&record).await.unwrap_err().is_unique_conflict());
    }

    #[tokio::test]
    async fn insert_requires_known_community() {
        let db = seeded().await;
        let orphan = EventRecord::new(Snowflake::new(10), Snowflake::new(99));
        let err = db.events().insert(&orphan).await.unwrap_err();
        assert!(!err.is_unique_conflict());
    }

    #[tokio::test]
    async fn set_channel_and_role() {
        let db = seeded().await;
        let id = Snowflake::new(10);
        db.events()
            .insert(&EventRecord::new(id, Snowflake::new(1)).with_channel(Snowflake::new(20)))
            .await
            .unwrap();

        assert!(db.events().set_channel(id, None).await.unwrap());
        assert!(db.events().set_role(id, Some(Snowflake::new(31))).await.unwrap());
        let found = db.events().find(id).await.unwrap().unwrap();
        assert_eq!(found.channel_id, None);
        assert_eq!(found.role_id, Some(Snowflake::new(31)));

        assert!(!db.events().set_channel(Snowflake::new(404), None).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_scoped_to_community() {
        let db = seeded().await;
        for (event, guild) in [(10u64, 1u64), (11, 1), (12, 2)] {
            db.events()
                .insert(&EventRecord::new(Snowflake::new(event), Snowflake::new(guild)))
                .await
                .unwrap();
        }

        let ids: Vec<u64> = db
            .events()
            .list_for_community(Snowflake::new(1))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.get())
            .collect();
        assert_eq!(ids, vec![10, 11]);

        assert!(db.events().delete(Snowflake::new(10)).await.unwrap());
        assert!(!db.events().delete(Snowflake::new(10)).await.unwrap());
    }
}
