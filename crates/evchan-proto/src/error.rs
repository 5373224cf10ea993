//! Error types for wire decoding.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Errors raised while decoding gateway frames or REST payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload was not valid JSON or did not match the expected shape.
    #[error("malformed {what}: {source}")]
    Malformed {
        /// Which structure was being decoded.
        what: &'static str,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A dispatch frame carried no event name.
    #[error("dispatch frame without event name")]
    MissingEventName,

    /// A snowflake string was not a decimal u64.
    #[error("invalid snowflake: {0:?}")]
    InvalidSnowflake(String),

    /// An opcode outside the documented set.
    #[error("unknown gateway opcode {0}")]
    UnknownOpCode(u8),
}

impl ProtocolError {
    pub(crate) fn malformed(what: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Malformed { what, source }
    }
}
