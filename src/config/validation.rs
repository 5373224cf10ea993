//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("bot.token is required (or set {})", super::types::TOKEN_ENV)]
    MissingToken,
    #[error("bot.default_announce_message must not be empty")]
    EmptyAnnounceMessage,
    #[error("bot.default_announce_message exceeds {max} characters ({len})")]
    AnnounceMessageTooLong { len: usize, max: usize },
    #[error("platform.api_base must be an http(s) URL, got '{0}'")]
    InvalidApiBase(String),
    #[error("platform.gateway_url must be a ws(s) URL, got '{0}'")]
    InvalidGatewayUrl(String),
    #[error("platform.request_timeout_ms must be greater than 0")]
    ZeroRequestTimeout,
    #[error("membership.lookup_attempts must be at least 1")]
    ZeroLookupAttempts,
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Longest announcement template accepted from the options command.
pub const ANNOUNCE_MESSAGE_MAX: usize = 255;

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config
        .bot
        .token
        .as_deref()
        .is_none_or(|t| t.trim().is_empty())
    {
        errors.push(ValidationError::MissingToken);
    }

    let message = &config.bot.default_announce_message;
    if message.trim().is_empty() {
        errors.push(ValidationError::EmptyAnnounceMessage);
    } else if message.chars().count() > ANNOUNCE_MESSAGE_MAX {
        errors.push(ValidationError::AnnounceMessageTooLong {
            len: message.chars().count(),
            max: ANNOUNCE_MESSAGE_MAX,
        });
    }

    let api = &config.platform.api_base;
    if !(api.starts_with("https://") || api.starts_with("http://")) {
        errors.push(ValidationError::InvalidApiBase(api.clone()));
    }
    let gateway = &config.platform.gateway_url;
    if !(gateway.starts_with("wss://") || gateway.starts_with("ws://")) {
        errors.push(ValidationError::InvalidGatewayUrl(gateway.clone()));
    }
    if config.platform.request_timeout_ms == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    if config.membership.lookup_attempts == 0 {
        errors.push(ValidationError::ZeroLookupAttempts);
    }

    if config.database.path != ":memory:" {
        let db_path = Path::new(&config.database.path);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DatabasePathInvalid(
                config.database.path.clone(),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
