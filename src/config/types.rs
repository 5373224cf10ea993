//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `bot.token`.
pub const TOKEN_ENV: &str = "EVCHAN_TOKEN";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Controller configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Bot identity and provisioning behaviour.
    #[serde(default)]
    pub bot: BotConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// REST and gateway endpoints.
    #[serde(default)]
    pub platform: PlatformConfig,
    /// Interest lookup polling.
    #[serde(default)]
    pub membership: MembershipConfig,
    /// Periodic reconciliation.
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Prometheus metrics HTTP port. Absent or 0 disables the endpoint.
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env(std::env::var(TOKEN_ENV).ok());
        Ok(config)
    }

    /// A non-empty token from the environment wins over the file.
    pub fn apply_env(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.bot.token = Some(token);
        }
    }
}

/// How interested users are given access to an event channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MembershipMode {
    /// One member-scoped permission overwrite per interested user.
    #[default]
    PerUserOverwrite,
    /// One role per event; interested users are added to it.
    SharedRole,
}

/// Bot identity and provisioning behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Bot token. `EVCHAN_TOKEN` overrides this.
    pub token: Option<String>,
    #[serde(default)]
    pub membership_mode: MembershipMode,
    /// Color for per-event roles in shared-role mode.
    #[serde(default = "default_role_color")]
    pub role_color: u32,
    /// Template stored for newly observed guilds. `%EVENT%` is replaced by the
    /// event name.
    #[serde(default = "default_announce_message")]
    pub default_announce_message: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            membership_mode: MembershipMode::default(),
            role_color: default_role_color(),
            default_announce_message: default_announce_message(),
        }
    }
}

fn default_role_color() -> u32 {
    0xFFFFFF
}

fn default_announce_message() -> String {
    "`%EVENT%` was just created, if you want to join the channel, mark yourself as interested on the event!"
        .to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "evchan.db".to_string()
}

/// REST and gateway endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Per-request timeout in milliseconds (default: 10000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How many times a rate-limited request is retried (default: 3).
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
}

impl PlatformConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            gateway_url: default_gateway_url(),
            request_timeout_ms: default_request_timeout_ms(),
            rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_rate_limit_retries() -> u32 {
    3
}

/// Interest lookup polling.
///
/// An interest notification can arrive before the create handler has
/// persisted the event record, so the lookup is retried a bounded number of
/// times before the notification is dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipConfig {
    #[serde(default = "default_lookup_attempts")]
    pub lookup_attempts: u32,
    #[serde(default = "default_lookup_interval_ms")]
    pub lookup_interval_ms: u64,
}

impl MembershipConfig {
    pub fn lookup_interval(&self) -> Duration {
        Duration::from_millis(self.lookup_interval_ms)
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            lookup_attempts: default_lookup_attempts(),
            lookup_interval_ms: default_lookup_interval_ms(),
        }
    }
}

fn default_lookup_attempts() -> u32 {
    5
}

fn default_lookup_interval_ms() -> u64 {
    1000
}

/// Periodic reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Seconds between sweeps of every stored community (0 disables).
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl SweepConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.bot.membership_mode, MembershipMode::PerUserOverwrite);
        assert_eq!(config.bot.role_color, 0xFFFFFF);
        assert_eq!(config.database.path, "evchan.db");
        assert_eq!(config.platform.api_base, "https://discord.com/api/v10");
        assert_eq!(config.platform.rate_limit_retries, 3);
        assert_eq!(config.membership.lookup_attempts, 5);
        assert_eq!(config.membership.lookup_interval(), Duration::from_secs(1));
        assert_eq!(config.sweep.interval(), Some(Duration::from_secs(3600)));
        assert!(config.metrics_port.is_none());
    }

    #[test]
    fn parses_full_file() {
        let config: Config = toml::from_str(
            r#"
metrics_port = 9100

[bot]
token = "abc"
membership_mode = "shared-role"
role_color = 0x00FF00

[database]
path = ":memory:"

[membership]
lookup_attempts = 2
lookup_interval_ms = 250

[sweep]
interval_secs = 0
"#,
        )
        .unwrap();

        assert_eq!(config.bot.token.as_deref(), Some("abc"));
        assert_eq!(config.bot.membership_mode, MembershipMode::SharedRole);
        assert_eq!(config.bot.role_color, 0x00FF00);
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.membership.lookup_attempts, 2);
        assert_eq!(config.sweep.interval(), None);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn env_token_overrides_file() {
        let mut config: Config = toml::from_str("[bot]\ntoken = \"file\"").unwrap();
        config.apply_env(Some("  ".to_string()));
        assert_eq!(config.bot.token.as_deref(), Some("file"));
        config.apply_env(Some("env".to_string()));
        assert_eq!(config.bot.token.as_deref(), Some("env"));
    }

    #[test]
    fn unknown_membership_mode_is_rejected() {
        let err = toml::from_str::<Config>("[bot]\nmembership_mode = \"everyone\"");
        assert!(err.is_err());
    }

    #[test]
    fn load_reads_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database]\npath = \"data/evchan.db\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.database.path, "data/evchan.db");

        let missing = Config::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
