//! Telemetry utilities: log setup, handler timing and notification
//! correlation.

use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log format (`json` or `text`).
pub const LOG_FORMAT_ENV: &str = "EVCHAN_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

impl LogFormat {
    /// Anything but `json` (case-insensitive) means text.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }
}

/// Install the global subscriber. `RUST_LOG` filters, default `info`.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Guard for timing a handler and tracking it as in flight.
///
/// Records handler latency when dropped.
pub struct HandlerTimer {
    kind: &'static str,
    start: Instant,
}

impl HandlerTimer {
    pub fn new(kind: &'static str) -> Self {
        crate::metrics::handler_started();
        Self {
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for HandlerTimer {
    fn drop(&mut self) {
        crate::metrics::handler_finished();
        crate::metrics::record_handler(self.kind, self.start.elapsed().as_secs_f64());
    }
}

/// Fresh correlation ID for one notification.
pub fn correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Standardized span constructors.
pub mod spans {
    use evchan_proto::Snowflake;
    use tracing::{Span, info_span};

    /// Span for one dispatched notification.
    pub fn notification(kind: &'static str, id: &str) -> Span {
        info_span!("notification", kind, id = %id)
    }

    /// Span for one reconciliation pass.
    pub fn reconcile(guild_id: Snowflake) -> Span {
        info_span!("reconcile", guild_id = %guild_id)
    }

    /// Span for a gateway session.
    pub fn gateway(attempt: u32) -> Span {
        info_span!("gateway", attempt)
    }
}
