//! # evchan-proto
//!
//! Wire model shared by the evchan controller: the subset of the Discord v10
//! REST and gateway surface needed to mirror guild scheduled events as text
//! channels.
//!
//! ## Contents
//!
//! - [`Snowflake`] identifiers, serialized as decimal strings
//! - Guild resources: [`Channel`], [`Role`], [`Message`], [`Invite`]
//! - [`ScheduledEvent`] with its [`EventStatus`] lifecycle
//! - Gateway frames ([`GatewayPayload`]) and typed dispatch decoding ([`GatewayEvent`])
//! - Interactions, interaction responses and application-command definitions
//! - [`channel_slug`], the canonical event-to-channel name transform
//!
//! ```rust
//! use evchan_proto::channel_slug;
//!
//! assert_eq!(channel_slug("Board  Games"), "board-games");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod channel;
pub mod command;
pub mod error;
pub mod event;
pub mod gateway;
pub mod guild;
pub mod interaction;
pub mod message;
pub mod permissions;
pub mod slug;
pub mod snowflake;

pub use self::channel::{Channel, ChannelKind, OverwriteKind, PermissionOverwrite};
pub use self::command::{CommandDefinition, CommandOptionDefinition, CommandOptionKind};
pub use self::error::{ProtocolError, Result};
pub use self::event::{EventStatus, EventUser, ScheduledEvent};
pub use self::gateway::{
    EventUserChange, GatewayEvent, GatewayPayload, Hello, Identify, Intents, OpCode, Ready,
};
pub use self::guild::{Guild, Role, UnavailableGuild};
pub use self::interaction::{
    Component, Interaction, InteractionKind, InteractionResponse, ResponseData, ResponseKind,
};
pub use self::message::{Invite, Message};
pub use self::permissions::Permissions;
pub use self::slug::{archived_slug, channel_slug, ARCHIVE_PREFIX};
pub use self::snowflake::Snowflake;
