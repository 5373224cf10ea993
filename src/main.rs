//! evchan - Event Channels
//!
//! Mirrors a guild's scheduled events as private text channels that
//! interested members can see.

mod config;
mod db;
mod dispatch;
mod error;
mod http;
mod metrics;
mod platform;
mod services;
mod telemetry;

use crate::config::Config;
use crate::db::Database;
use crate::dispatch::Dispatcher;
use crate::platform::{Gateway, Platform, RestClient};
use crate::services::command::CommandSchema;
use crate::services::reconcile::spawn_sweep_task;
use crate::services::{Context, Settings};
use crate::telemetry::LogFormat;
use anyhow::Context as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Buffered notifications between the gateway and the dispatcher.
const NOTIFICATION_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    telemetry::init_logging(LogFormat::from_env());

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }
    let token = config
        .bot
        .token
        .clone()
        .context("bot token missing after validation")?;

    info!(
        membership_mode = ?config.bot.membership_mode,
        database = %config.database.path,
        "Starting evchan"
    );

    metrics::init();

    let db = Database::new(&config.database.path).await?;
    let rest = RestClient::new(&config.platform, &token)?;
    let bot = rest
        .current_identity()
        .await
        .context("failed to identify the bot account")?;
    info!(user_id = %bot.user_id, application_id = %bot.application_id, "Authenticated");

    let ctx = Context::new(db, Arc::new(rest), bot, Settings::from_config(&config));
    let schema = Arc::new(CommandSchema::new());
    let shutdown = CancellationToken::new();

    // Prometheus metrics are optional; 0 or absent disables the endpoint.
    match config.metrics_port.filter(|port| *port != 0) {
        Some(port) => {
            tokio::spawn(http::run_http_server(port, shutdown.clone()));
        }
        None => info!("Metrics endpoint disabled"),
    }

    let sweeper = config
        .sweep
        .interval()
        .map(|every| spawn_sweep_task(ctx.clone(), every, shutdown.clone()));
    if sweeper.is_none() {
        info!("Periodic sweep disabled");
    }

    let (tx, rx) = tokio::sync::mpsc::channel(NOTIFICATION_QUEUE);
    let dispatcher = tokio::spawn(Dispatcher::new(ctx, schema, shutdown.clone()).run(rx));
    let gateway = tokio::spawn(Gateway::new(&config.platform, token, tx, shutdown.clone()).run());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        });
    }

    let result = match gateway.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Gateway failed");
            Err(e)
        }
        Err(e) => Err(anyhow::Error::from(e).context("gateway task panicked")),
    };

    // The gateway is gone either way; stop everything else and drain.
    shutdown.cancel();
    dispatcher.await.context("dispatcher task panicked")?;
    if let Some(sweeper) = sweeper {
        sweeper.await.context("sweep task panicked")?;
    }
    info!("evchan stopped");
    result
}
