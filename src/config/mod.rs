//! Configuration loading and management.
//!
//! - [`types`]: config struct definitions and TOML loading
//! - [`validation`]: startup checks that report every problem at once

mod types;
mod validation;

pub use types::{Config, MembershipMode, PlatformConfig};
pub use validation::{ANNOUNCE_MESSAGE_MAX, validate};
