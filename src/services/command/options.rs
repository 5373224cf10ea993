//! `event-channels-bot-options`: per-community settings.

use super::schema::{
    CommandSchema, OPT_ANNOUNCE_CHANNEL, OPT_ANNOUNCE_MESSAGE, OPT_CATEGORY, OPT_DELETE_WHEN_DONE,
    OPTIONS_COMMAND, SYNC_COMMAND,
};
use crate::db::{CommunityRecord, CommunityUpdate};
use crate::error::{ServiceError, ServiceResult};
use crate::services::Context;
use evchan_proto::{Interaction, Snowflake};
use tracing::info;

/// A validated options command, before channel references are resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsRequest {
    pub announce_message: Option<String>,
    pub announce_channel: Option<Snowflake>,
    pub delete_when_done: Option<bool>,
    pub category: Option<Snowflake>,
}

/// Read and check the supplied options against the declared schema.
pub fn parse_options(
    schema: &CommandSchema,
    interaction: &Interaction,
) -> ServiceResult<OptionsRequest> {
    let announce_message = match interaction.option_str(OPT_ANNOUNCE_MESSAGE) {
        Some(message) => {
            let message = message.trim();
            if message.is_empty() {
                return Err(ServiceError::validation(
                    "The announcement message cannot be empty.",
                ));
            }
            let max = schema
                .option(OPTIONS_COMMAND, OPT_ANNOUNCE_MESSAGE)
                .and_then(|o| o.max_length)
                .map(usize::from);
            if let Some(max) = max
                && message.chars().count() > max
            {
                return Err(ServiceError::validation(format!(
                    "The announcement message can be at most {max} characters."
                )));
            }
            Some(message.to_string())
        }
        None => None,
    };

    let snowflake = |name: &str| -> ServiceResult<Option<Snowflake>> {
        match interaction.option(name) {
            None => Ok(None),
            Some(_) => interaction.option_snowflake(name).map(Some).ok_or_else(|| {
                ServiceError::validation(format!("`{name}` must be a channel."))
            }),
        }
    };

    Ok(OptionsRequest {
        announce_message,
        announce_channel: snowflake(OPT_ANNOUNCE_CHANNEL)?,
        delete_when_done: interaction.option_bool(OPT_DELETE_WHEN_DONE),
        category: snowflake(OPT_CATEGORY)?,
    })
}

/// Resolve a channel reference and check it belongs to the guild and has
/// an accepted kind.
async fn resolve_channel(
    ctx: &Context,
    schema: &CommandSchema,
    guild_id: Snowflake,
    option: &str,
    channel_id: Snowflake,
) -> ServiceResult<()> {
    let channel = match ctx.platform.get_channel(channel_id).await {
        Ok(channel) => channel,
        Err(e) if e.is_not_found() => {
            return Err(ServiceError::validation(format!(
                "The channel given for `{option}` does not exist."
            )));
        }
        Err(e) => return Err(e.into()),
    };
    if channel.guild_id != Some(guild_id) {
        return Err(ServiceError::validation(format!(
            "The channel given for `{option}` is not in this server."
        )));
    }
    let kinds = schema.channel_kinds(OPTIONS_COMMAND, option);
    if !kinds.is_empty() && !kinds.contains(&channel.kind) {
        return Err(ServiceError::validation(format!(
            "The channel given for `{option}` has the wrong type."
        )));
    }
    Ok(())
}

/// Apply the options command. Nothing is stored unless every option is valid.
pub async fn apply_options(
    ctx: &Context,
    schema: &CommandSchema,
    guild_id: Snowflake,
    interaction: &Interaction,
) -> ServiceResult<String> {
    let request = parse_options(schema, interaction)?;
    if let Some(channel_id) = request.announce_channel {
        resolve_channel(ctx, schema, guild_id, OPT_ANNOUNCE_CHANNEL, channel_id).await?;
    }
    if let Some(category_id) = request.category {
        resolve_channel(ctx, schema, guild_id, OPT_CATEGORY, category_id).await?;
    }

    ctx.ensure_community(guild_id).await?;
    let update = CommunityUpdate {
        announce_message: request.announce_message,
        delete_when_done: request.delete_when_done,
        announce_channel_id: request.announce_channel,
        category_id: request.category,
        configuration_completed: Some(true),
        ..CommunityUpdate::default()
    };
    ctx.db.communities().update(guild_id, &update).await?;

    let community = ctx
        .db
        .communities()
        .find(guild_id)
        .await?
        .ok_or_else(|| ServiceError::inconsistency(format!("community {guild_id} vanished")))?;
    info!(guild_id = %guild_id, "Community options updated");
    Ok(summary(&community))
}

fn summary(community: &CommunityRecord) -> String {
    let channel = |id: Option<Snowflake>| {
        id.map_or_else(|| "none".to_string(), |id| format!("<#{id}>"))
    };
    let mut text = format!(
        "Options saved.\nAnnouncement: {}\nAnnounce channel: {}\nCategory: {}\nWhen an event ends: {}",
        community.announce_message,
        channel(community.announce_channel_id),
        channel(community.category_id),
        if community.delete_when_done {
            "delete its channel"
        } else {
            "archive its channel"
        },
    );
    if !community.initial_sync_completed {
        text.push_str(&format!(
            "\nRun `/{SYNC_COMMAND}` to link existing channels and finish setup."
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::*;
    use evchan_proto::ChannelKind;
    use serde_json::{Value, json};

    fn command(options: Vec<(&str, Value)>) -> Interaction {
        let options: Vec<Value> = options
            .into_iter()
            .map(|(name, value)| json!({"name": name, "type": 3, "value": value}))
            .collect();
        serde_json::from_value(json!({
            "id": "1", "application_id": "2", "type": 2, "token": "tok",
            "guild_id": GUILD.to_string(),
            "member": {"user": {"id": "7000"}},
            "data": {"name": OPTIONS_COMMAND, "options": options}
        }))
        .unwrap()
    }

    #[test]
    fn parses_supplied_options_only() {
        let schema = CommandSchema::new();
        let request = parse_options(
            &schema,
            &command(vec![
                (OPT_ANNOUNCE_MESSAGE, json!("  New: %EVENT%  ")),
                (OPT_DELETE_WHEN_DONE, json!(true)),
            ]),
        )
        .unwrap();
        assert_eq!(
            request,
            OptionsRequest {
                announce_message: Some("New: %EVENT%".to_string()),
                delete_when_done: Some(true),
                ..Default::default()
            }
        );
    }

    #[test]
    fn rejects_long_or_empty_message() {
        let schema = CommandSchema::new();
        let long = "x".repeat(256);
        let err = parse_options(&schema, &command(vec![(OPT_ANNOUNCE_MESSAGE, json!(long))]))
            .unwrap_err();
        assert_eq!(err.error_code(), "validation");
        assert!(err.user_message().contains("255"));

        let exact = "é".repeat(255);
        assert!(parse_options(&schema, &command(vec![(OPT_ANNOUNCE_MESSAGE, json!(exact))])).is_ok());

        let err = parse_options(&schema, &command(vec![(OPT_ANNOUNCE_MESSAGE, json!("   "))]))
            .unwrap_err();
        assert_eq!(err.error_code(), "validation");
    }

    #[test]
    fn rejects_non_snowflake_channel() {
        let schema = CommandSchema::new();
        let err = parse_options(&schema, &command(vec![(OPT_CATEGORY, json!("general"))]))
            .unwrap_err();
        assert_eq!(err.error_code(), "validation");
    }

    #[tokio::test]
    async fn wrong_channel_kind_changes_nothing() {
        let (ctx, fake) = context().await;
        let schema = CommandSchema::new();
        let text = fake.add_channel(GUILD, "general", ChannelKind::GuildText);

        let err = apply_options(
            &ctx,
            &schema,
            GUILD,
            &command(vec![
                (OPT_ANNOUNCE_MESSAGE, json!("hello %EVENT%")),
                (OPT_CATEGORY, json!(text.to_string())),
            ]),
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_code(), "validation");
        assert!(ctx.db.communities().find(GUILD).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_channel_is_rejected() {
        let (ctx, fake) = context().await;
        let schema = CommandSchema::new();
        let elsewhere = fake.add_channel(Snowflake::new(999), "news", ChannelKind::GuildText);

        let err = apply_options(
            &ctx,
            &schema,
            GUILD,
            &command(vec![(OPT_ANNOUNCE_CHANNEL, json!(elsewhere.to_string()))]),
        )
        .await
        .unwrap_err();
        assert!(err.user_message().contains("not in this server"));
    }

    #[tokio::test]
    async fn applies_and_completes_configuration() {
        let (ctx, fake) = context().await;
        let schema = CommandSchema::new();
        let announce = fake.add_channel(GUILD, "events", ChannelKind::GuildText);
        let category = fake.add_channel(GUILD, "Events", ChannelKind::GuildCategory);

        let reply = apply_options(
            &ctx,
            &schema,
            GUILD,
            &command(vec![
                (OPT_ANNOUNCE_MESSAGE, json!("Join %EVENT%")),
                (OPT_ANNOUNCE_CHANNEL, json!(announce.to_string())),
                (OPT_DELETE_WHEN_DONE, json!(true)),
                (OPT_CATEGORY, json!(category.to_string())),
            ]),
        )
        .await
        .unwrap();
        assert!(reply.contains("initial-sync"));

        let stored = ctx.db.communities().find(GUILD).await.unwrap().unwrap();
        assert_eq!(stored.announce_message, "Join %EVENT%");
        assert_eq!(stored.announce_channel_id, Some(announce));
        assert_eq!(stored.category_id, Some(category));
        assert!(stored.delete_when_done);
        assert!(stored.configuration_completed);
        assert!(!stored.initial_sync_completed);
    }
}
