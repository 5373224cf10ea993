//! Discord v10 REST client.

use super::{
    BotIdentity, CreateChannel, EditChannel, Platform, PlatformResult, RoleSpec,
};
use crate::config::PlatformConfig;
use crate::error::PlatformError;
use crate::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use evchan_proto::gateway::{ApplicationRef, UserRef};
use evchan_proto::{
    Channel, CommandDefinition, EventUser, Interaction, InteractionResponse, Invite, Message,
    PermissionOverwrite, ResponseData, Role, ScheduledEvent, Snowflake,
};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest error body kept in a [`PlatformError::Http`].
const ERROR_BODY_LIMIT: usize = 800;

/// Body of a 429 response.
#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// REST implementation of [`Platform`].
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    api_base: String,
    rate_limit_retries: u32,
}

impl RestClient {
    pub fn new(config: &PlatformConfig, token: &str) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bot {}", token.trim()))
            .context("bot token contains characters not allowed in a header")?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                "DiscordBot (https://github.com/evchan/evchan, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            )),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .context("failed to create platform http client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            rate_limit_retries: config.rate_limit_retries,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.api_base, path))
    }

    /// Send a request, waiting out rate limits. Anything else that is not a
    /// success is mapped to an error immediately.
    async fn send<F>(&self, operation: &'static str, mut builder: F) -> PlatformResult<Response>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut retries = 0_u32;
        loop {
            let response = match builder().send().await {
                Ok(response) => response,
                Err(e) => {
                    metrics::record_platform_request("transient");
                    return Err(PlatformError::Transient(format!("{operation}: {e}")));
                }
            };

            let status = response.status();
            if status.is_success() {
                metrics::record_platform_request("ok");
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let header_delay = parse_retry_after(response.headers());
                let body_delay = response
                    .json::<RateLimitBody>()
                    .await
                    .ok()
                    .and_then(|b| Duration::try_from_secs_f64(b.retry_after).ok());
                let retry_after = body_delay.or(header_delay).unwrap_or(Duration::from_secs(1));

                if retries < self.rate_limit_retries {
                    retries += 1;
                    debug!(operation, ?retry_after, retries, "Rate limited, waiting");
                    tokio::time::sleep(retry_after).await;
                    continue;
                }
                metrics::record_platform_request("rate_limited");
                warn!(operation, ?retry_after, "Rate limit retries exhausted");
                return Err(PlatformError::RateLimited { retry_after });
            }

            let body = response.text().await.unwrap_or_default();
            let error = if status == StatusCode::NOT_FOUND {
                PlatformError::NotFound(operation.to_string())
            } else if status.is_server_error() {
                PlatformError::Transient(format!(
                    "{operation}: {status}: {}",
                    truncate_for_error(&body, ERROR_BODY_LIMIT)
                ))
            } else {
                PlatformError::Http {
                    status: status.as_u16(),
                    body: truncate_for_error(&body, ERROR_BODY_LIMIT),
                }
            };
            metrics::record_platform_request(error.error_code());
            return Err(error);
        }
    }

    async fn request_json<T, F>(&self, operation: &'static str, builder: F) -> PlatformResult<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> RequestBuilder,
    {
        self.send(operation, builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PlatformError::Decode {
                what: operation,
                reason: e.to_string(),
            })
    }

    async fn request_empty<F>(&self, operation: &'static str, builder: F) -> PlatformResult<()>
    where
        F: FnMut() -> RequestBuilder,
    {
        self.send(operation, builder).await.map(drop)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn truncate_for_error(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let mut out: String = body.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[async_trait]
impl Platform for RestClient {
    async fn current_identity(&self) -> PlatformResult<BotIdentity> {
        let user: UserRef = self
            .request_json("get current user", || self.request(Method::GET, "/users/@me"))
            .await?;
        let application: ApplicationRef = self
            .request_json("get current application", || {
                self.request(Method::GET, "/oauth2/applications/@me")
            })
            .await?;
        Ok(BotIdentity {
            user_id: user.id,
            application_id: application.id,
        })
    }

    async fn list_channels(&self, guild_id: Snowflake) -> PlatformResult<Vec<Channel>> {
        let path = format!("/guilds/{guild_id}/channels");
        self.request_json("list channels", || self.request(Method::GET, &path))
            .await
    }

    async fn get_channel(&self, channel_id: Snowflake) -> PlatformResult<Channel> {
        let path = format!("/channels/{channel_id}");
        self.request_json("get channel", || self.request(Method::GET, &path))
            .await
    }

    async fn create_channel(
        &self,
        guild_id: Snowflake,
        spec: &CreateChannel,
    ) -> PlatformResult<Channel> {
        let path = format!("/guilds/{guild_id}/channels");
        self.request_json("create channel", || {
            self.request(Method::POST, &path).json(spec)
        })
        .await
    }

    async fn edit_channel(
        &self,
        channel_id: Snowflake,
        edit: &EditChannel,
    ) -> PlatformResult<Channel> {
        let path = format!("/channels/{channel_id}");
        self.request_json("edit channel", || {
            self.request(Method::PATCH, &path).json(edit)
        })
        .await
    }

    async fn delete_channel(&self, channel_id: Snowflake) -> PlatformResult<()> {
        let path = format!("/channels/{channel_id}");
        self.request_empty("delete channel", || self.request(Method::DELETE, &path))
            .await
    }

    async fn list_roles(&self, guild_id: Snowflake) -> PlatformResult<Vec<Role>> {
        let path = format!("/guilds/{guild_id}/roles");
        self.request_json("list roles", || self.request(Method::GET, &path))
            .await
    }

    async fn create_role(&self, guild_id: Snowflake, spec: &RoleSpec) -> PlatformResult<Role> {
        let path = format!("/guilds/{guild_id}/roles");
        self.request_json("create role", || {
            self.request(Method::POST, &path).json(spec)
        })
        .await
    }

    async fn edit_role(
        &self,
        guild_id: Snowflake,
        role_id: Snowflake,
        spec: &RoleSpec,
    ) -> PlatformResult<Role> {
        let path = format!("/guilds/{guild_id}/roles/{role_id}");
        self.request_json("edit role", || {
            self.request(Method::PATCH, &path).json(spec)
        })
        .await
    }

    async fn delete_role(&self, guild_id: Snowflake, role_id: Snowflake) -> PlatformResult<()> {
        let path = format!("/guilds/{guild_id}/roles/{role_id}");
        self.request_empty("delete role", || self.request(Method::DELETE, &path))
            .await
    }

    async fn set_permission_overwrite(
        &self,
        channel_id: Snowflake,
        overwrite: &PermissionOverwrite,
    ) -> PlatformResult<()> {
        let path = format!("/channels/{channel_id}/permissions/{}", overwrite.id);
        let body = json!({
            "type": overwrite.kind,
            "allow": overwrite.allow,
            "deny": overwrite.deny,
        });
        self.request_empty("set permission overwrite", || {
            self.request(Method::PUT, &path).json(&body)
        })
        .await
    }

    async fn clear_permission_overwrite(
        &self,
        channel_id: Snowflake,
        target_id: Snowflake,
    ) -> PlatformResult<()> {
        let path = format!("/channels/{channel_id}/permissions/{target_id}");
        self.request_empty("clear permission overwrite", || {
            self.request(Method::DELETE, &path)
        })
        .await
    }

    async fn send_message(&self, channel_id: Snowflake, content: &str) -> PlatformResult<Message> {
        let path = format!("/channels/{channel_id}/messages");
        let body = json!({ "content": content });
        self.request_json("send message", || {
            self.request(Method::POST, &path).json(&body)
        })
        .await
    }

    async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> PlatformResult<()> {
        let path = format!("/channels/{channel_id}/messages/{message_id}");
        self.request_empty("delete message", || self.request(Method::DELETE, &path))
            .await
    }

    async fn create_invite(&self, channel_id: Snowflake) -> PlatformResult<Invite> {
        let path = format!("/channels/{channel_id}/invites");
        let body = json!({ "max_age": 0, "unique": false });
        self.request_json("create invite", || {
            self.request(Method::POST, &path).json(&body)
        })
        .await
    }

    async fn list_scheduled_events(
        &self,
        guild_id: Snowflake,
    ) -> PlatformResult<Vec<ScheduledEvent>> {
        let path = format!("/guilds/{guild_id}/scheduled-events");
        self.request_json("list scheduled events", || {
            self.request(Method::GET, &path)
        })
        .await
    }

    async fn list_interested_users(
        &self,
        guild_id: Snowflake,
        event_id: Snowflake,
        limit: u32,
        after: Option<Snowflake>,
    ) -> PlatformResult<Vec<EventUser>> {
        let path = format!("/guilds/{guild_id}/scheduled-events/{event_id}/users");
        let mut query = vec![("limit", limit.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        self.request_json("list interested users", || {
            self.request(Method::GET, &path).query(&query)
        })
        .await
    }

    async fn add_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> PlatformResult<()> {
        let path = format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}");
        self.request_empty("add member role", || self.request(Method::PUT, &path))
            .await
    }

    async fn remove_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> PlatformResult<()> {
        let path = format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}");
        self.request_empty("remove member role", || {
            self.request(Method::DELETE, &path)
        })
        .await
    }

    async fn respond_to_interaction(
        &self,
        interaction: &Interaction,
        response: &InteractionResponse,
    ) -> PlatformResult<()> {
        let path = format!(
            "/interactions/{}/{}/callback",
            interaction.id, interaction.token
        );
        self.request_empty("respond to interaction", || {
            self.request(Method::POST, &path).json(response)
        })
        .await
    }

    async fn edit_interaction_response(
        &self,
        interaction: &Interaction,
        data: &ResponseData,
    ) -> PlatformResult<()> {
        let path = format!(
            "/webhooks/{}/{}/messages/@original",
            interaction.application_id, interaction.token
        );
        self.request_empty("edit interaction response", || {
            self.request(Method::PATCH, &path).json(data)
        })
        .await
    }

    async fn register_commands(
        &self,
        application_id: Snowflake,
        commands: &[CommandDefinition],
    ) -> PlatformResult<()> {
        let path = format!("/applications/{application_id}/commands");
        self.request_empty("register commands", || {
            self.request(Method::PUT, &path).json(commands)
        })
        .await
    }
}
