//! Codec error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Buffer too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Unexpected payload size: expected {expected} bytes, got {actual}")]
    UnexpectedSize { expected: usize, actual: usize },

    #[error("String of {len} bytes does not fit a {field_size}-byte field")]
    FieldTooLong { len: usize, field_size: usize },

    #[error("Padded field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Payload of {0} bytes does not fit the 32-bit size field")]
    PayloadTooLarge(usize),
}

impl PacketError {
    /// Whether the error stems from local input rather than undecodable bytes
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::FieldTooLong { .. } | Self::PayloadTooLarge(_))
    }
}
