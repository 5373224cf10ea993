//! Canonical channel names for scheduled events.
//!
//! An event's channel is named after the event: runs of whitespace collapse
//! to a single hyphen and the result is lower-cased. Everything else is kept
//! verbatim, so punctuation survives (`"Movie Night!"` → `"movie-night!"`).

use regex::Regex;
use std::sync::OnceLock;

/// Prefix applied to a channel when its event ends and the guild archives
/// instead of deleting.
pub const ARCHIVE_PREFIX: &str = "done-";

fn whitespace() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

/// Slug for an event name.
///
/// Pure and idempotent: `channel_slug(&channel_slug(x)) == channel_slug(x)`.
pub fn channel_slug(name: &str) -> String {
    whitespace().replace_all(name, "-").to_lowercase()
}

/// Name an archived event channel takes.
pub fn archived_slug(name: &str) -> String {
    format!("{ARCHIVE_PREFIX}{}", channel_slug(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(
            channel_slug("Community Movie   Night!"),
            "community-movie-night!"
        );
        assert_eq!(channel_slug("a\t\nb"), "a-b");
    }

    #[test]
    fn lowercases() {
        assert_eq!(channel_slug("Board Games"), "board-games");
        assert_eq!(channel_slug("ÉCOLE"), "école");
    }

    #[test]
    fn archive_prefix() {
        assert_eq!(archived_slug("Board Games"), "done-board-games");
    }
}
