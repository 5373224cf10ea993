//! Operator commands and the initial-sync components.
//!
//! Handlers compute a reply; [`CommandHandler`] delivers it. Failures are
//! turned into a short ephemeral reply and never escape as handler errors
//! unless the reply itself cannot be delivered.

pub mod options;
pub mod schema;
pub mod setup;

pub use schema::CommandSchema;
pub use setup::SyncAction;

use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::services::Context;
use evchan_proto::{Interaction, InteractionResponse, ResponseData, Snowflake};
use schema::{OPTIONS_COMMAND, SYNC_COMMAND};
use tracing::{debug, warn};

pub struct CommandHandler<'a> {
    ctx: &'a Context,
    schema: &'a CommandSchema,
}

impl<'a> CommandHandler<'a> {
    pub fn new(ctx: &'a Context, schema: &'a CommandSchema) -> Self {
        Self { ctx, schema }
    }

    /// Handle a slash command.
    pub async fn handle_command(&self, interaction: &Interaction) -> ServiceResult<()> {
        let result = match guild_of(interaction) {
            Ok(guild_id) => self.run_command(guild_id, interaction).await,
            Err(e) => Err(e),
        };
        let response = self.reply_or_error(result, interaction);
        self.ctx
            .platform
            .respond_to_interaction(interaction, &response)
            .await?;
        Ok(())
    }

    async fn run_command(
        &self,
        guild_id: Snowflake,
        interaction: &Interaction,
    ) -> ServiceResult<InteractionResponse> {
        match interaction.command_name() {
            Some(OPTIONS_COMMAND) => {
                options::apply_options(self.ctx, self.schema, guild_id, interaction)
                    .await
                    .map(InteractionResponse::ephemeral)
            }
            Some(SYNC_COMMAND) => setup::start(self.ctx, guild_id).await,
            other => Err(ServiceError::validation(format!(
                "Unknown command `{}`.",
                other.unwrap_or_default()
            ))),
        }
    }

    /// Handle a button press or select in the initial-sync flow.
    pub async fn handle_component(&self, interaction: &Interaction) -> ServiceResult<()> {
        let Some(action) = interaction.custom_id().and_then(SyncAction::parse) else {
            debug!(custom_id = ?interaction.custom_id(), "Ignoring foreign component");
            return Ok(());
        };
        let guild_id = match guild_of(interaction) {
            Ok(guild_id) => guild_id,
            Err(e) => {
                let response = self.reply_or_error(Err(e), interaction);
                self.ctx
                    .platform
                    .respond_to_interaction(interaction, &response)
                    .await?;
                return Ok(());
            }
        };

        if action == SyncAction::Finish {
            return self.finish(guild_id, interaction).await;
        }

        let result = setup::advance(self.ctx, guild_id, action, interaction.values()).await;
        let response = self.reply_or_error(result, interaction);
        self.ctx
            .platform
            .respond_to_interaction(interaction, &response)
            .await?;
        Ok(())
    }

    /// Finishing can take a while, so the interaction is acknowledged first
    /// and the original message edited with the outcome.
    async fn finish(&self, guild_id: Snowflake, interaction: &Interaction) -> ServiceResult<()> {
        self.ctx
            .platform
            .respond_to_interaction(interaction, &InteractionResponse::deferred_update())
            .await?;

        let data = match setup::finish(self.ctx, guild_id).await {
            Ok(summary) => ResponseData {
                content: Some(summary.message()),
                components: Some(Vec::new()),
                flags: None,
            },
            Err(e) => {
                report(&e, interaction);
                ResponseData {
                    content: Some(e.user_message()),
                    components: None,
                    flags: None,
                }
            }
        };
        self.ctx
            .platform
            .edit_interaction_response(interaction, &data)
            .await?;
        Ok(())
    }

    fn reply_or_error(
        &self,
        result: ServiceResult<InteractionResponse>,
        interaction: &Interaction,
    ) -> InteractionResponse {
        result.unwrap_or_else(|e| {
            report(&e, interaction);
            InteractionResponse::ephemeral(e.user_message())
        })
    }
}

fn guild_of(interaction: &Interaction) -> ServiceResult<Snowflake> {
    interaction
        .guild_id
        .ok_or_else(|| ServiceError::validation("This only works inside a server."))
}

fn report(e: &ServiceError, interaction: &Interaction) {
    metrics::record_handler_error(e.error_code());
    match e {
        ServiceError::Validation(_) => debug!(
            guild_id = ?interaction.guild_id,
            user_id = ?interaction.invoker_id(),
            error = %e,
            "Rejected command input"
        ),
        _ => warn!(
            guild_id = ?interaction.guild_id,
            user_id = ?interaction.invoker_id(),
            code = e.error_code(),
            error = %e,
            "Command failed"
        ),
    }
}
