//! Slash-command definitions, built once at startup.

use evchan_proto::{
    ChannelKind, CommandDefinition, CommandOptionDefinition, CommandOptionKind, Permissions,
};

pub const OPTIONS_COMMAND: &str = "event-channels-bot-options";
pub const SYNC_COMMAND: &str = "event-channels-initial-sync";

pub const OPT_ANNOUNCE_MESSAGE: &str = "announce-message";
pub const OPT_ANNOUNCE_CHANNEL: &str = "announce-channel";
pub const OPT_DELETE_WHEN_DONE: &str = "delete-channel-when-event-done";
pub const OPT_CATEGORY: &str = "category-channel";

/// The registered command set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSchema {
    commands: Vec<CommandDefinition>,
}

impl Default for CommandSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSchema {
    pub fn new() -> Self {
        Self {
            commands: vec![options_command(), sync_command()],
        }
    }

    pub fn definitions(&self) -> &[CommandDefinition] {
        &self.commands
    }

    /// Declared option `name` of command `command`.
    pub fn option(&self, command: &str, name: &str) -> Option<&CommandOptionDefinition> {
        self.commands
            .iter()
            .find(|c| c.name == command)?
            .options
            .iter()
            .find(|o| o.name == name)
    }

    /// Channel kinds accepted by a channel option; empty means any.
    pub fn channel_kinds(&self, command: &str, name: &str) -> &[ChannelKind] {
        self.option(command, name)
            .map(|o| o.channel_types.as_slice())
            .unwrap_or_default()
    }
}

fn admin_command(
    name: &str,
    description: &str,
    options: Vec<CommandOptionDefinition>,
) -> CommandDefinition {
    CommandDefinition {
        name: name.to_string(),
        description: description.to_string(),
        options,
        default_member_permissions: Some(Permissions::MANAGE_GUILD),
        dm_permission: Some(false),
    }
}

fn option(kind: CommandOptionKind, name: &str, description: &str) -> CommandOptionDefinition {
    CommandOptionDefinition {
        kind,
        name: name.to_string(),
        description: description.to_string(),
        required: false,
        max_length: None,
        channel_types: Vec::new(),
    }
}

fn options_command() -> CommandDefinition {
    admin_command(
        OPTIONS_COMMAND,
        "Set bot options",
        vec![
            CommandOptionDefinition {
                max_length: Some(crate::config::ANNOUNCE_MESSAGE_MAX as u16),
                ..option(
                    CommandOptionKind::String,
                    OPT_ANNOUNCE_MESSAGE,
                    "Announcement posted for new events; %EVENT% is replaced by the event name",
                )
            },
            CommandOptionDefinition {
                channel_types: vec![ChannelKind::GuildText],
                ..option(
                    CommandOptionKind::Channel,
                    OPT_ANNOUNCE_CHANNEL,
                    "Where new events are announced",
                )
            },
            option(
                CommandOptionKind::Boolean,
                OPT_DELETE_WHEN_DONE,
                "Delete event channels when the event ends instead of archiving them",
            ),
            CommandOptionDefinition {
                channel_types: vec![ChannelKind::GuildCategory],
                ..option(
                    CommandOptionKind::Channel,
                    OPT_CATEGORY,
                    "The category to create event channels in",
                )
            },
        ],
    )
}

fn sync_command() -> CommandDefinition {
    admin_command(
        SYNC_COMMAND,
        "Link existing channels to existing events, then start managing them",
        Vec::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_admin_only() {
        let schema = CommandSchema::new();
        assert_eq!(schema.definitions().len(), 2);
        for def in schema.definitions() {
            assert_eq!(def.default_member_permissions, Some(Permissions::MANAGE_GUILD));
            assert_eq!(def.dm_permission, Some(false));
        }
    }

    #[test]
    fn option_lookup() {
        let schema = CommandSchema::new();
        assert_eq!(
            schema
                .option(OPTIONS_COMMAND, OPT_ANNOUNCE_MESSAGE)
                .and_then(|o| o.max_length),
            Some(255)
        );
        assert_eq!(
            schema.channel_kinds(OPTIONS_COMMAND, OPT_CATEGORY),
            &[ChannelKind::GuildCategory]
        );
        assert!(schema.option(SYNC_COMMAND, OPT_CATEGORY).is_none());
        assert!(schema.channel_kinds("nope", OPT_CATEGORY).is_empty());
    }
}
