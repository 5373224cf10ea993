//! Unified error handling for evchan.
//!
//! This module provides the error hierarchy shared by the platform client
//! and the services, with automatic conversions, user-facing reply text, and
//! metric labeling.

use crate::db::DbError;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Platform Errors (REST client)
// ============================================================================

/// Errors returned by a [`crate::platform::Platform`] call.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The addressed resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Still rate limited after exhausting the retry budget.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Network failure, timeout, or a 5xx response.
    #[error("transient platform error: {0}")]
    Transient(String),

    /// Any other non-success status.
    #[error("platform returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

impl PlatformError {
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Http { .. } => "http",
            Self::Decode { .. } => "decode",
        }
    }
}

// ============================================================================
// Service Errors (handlers)
// ============================================================================

/// Errors that can occur while handling a notification or command.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Db(#[from] DbError),

    /// Operator input rejected; the message is shown to the invoker as-is.
    #[error("{0}")]
    Validation(String),

    /// Stored or live state contradicts itself (missing community row, no
    /// everyone role).
    #[error("inconsistent state: {0}")]
    Inconsistency(String),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn inconsistency(msg: impl Into<String>) -> Self {
        Self::Inconsistency(msg.into())
    }

    /// Whether the failure means the target is already gone.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Platform(e) if e.is_not_found())
    }

    #[inline]
    pub fn is_unique_conflict(&self) -> bool {
        matches!(self, Self::Db(e) if e.is_unique_conflict())
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Platform(e) => e.error_code(),
            Self::Db(e) if e.is_unique_conflict() => "unique_conflict",
            Self::Db(_) => "db",
            Self::Validation(_) => "validation",
            Self::Inconsistency(_) => "inconsistency",
        }
    }

    /// Short reply for the member who invoked a command.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Platform(PlatformError::NotFound(_)) => {
                "That channel or event no longer exists.".to_string()
            }
            Self::Platform(PlatformError::RateLimited { .. } | PlatformError::Transient(_)) => {
                "Discord is not responding right now, please try again in a moment.".to_string()
            }
            _ => "Something went wrong, please try again later.".to_string(),
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
