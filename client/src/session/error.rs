//! Session error types

use protocol::{CryptoError, PacketError};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error category carried by a failed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Format,
    Network,
    KeyFormat,
    Decrypt,
    Padding,
    Protocol,
    Registration,
    KeyExchange,
    Integrity,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Format => "format",
            Self::Network => "network",
            Self::KeyFormat => "key format",
            Self::Decrypt => "decrypt",
            Self::Padding => "padding",
            Self::Protocol => "protocol",
            Self::Registration => "registration",
            Self::KeyExchange => "key exchange",
            Self::Integrity => "integrity",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Malformed data: {0}")]
    Format(PacketError),

    #[error("Network error while {action}: {source}")]
    Network {
        action: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Timed out after {after:?} while {action}")]
    Timeout { action: &'static str, after: Duration },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Key exchange failed: {reason}")]
    KeyExchange {
        reason: String,
        #[source]
        source: Option<CryptoError>,
    },

    #[error("CRC mismatch after {attempts} attempt(s): client {client_crc}, server {server_crc}")]
    Integrity {
        attempts: u32,
        client_crc: u32,
        server_crc: u32,
    },

    #[error("Session aborted")]
    Cancelled,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Format(_) => ErrorKind::Format,
            Self::Network { .. } | Self::Timeout { .. } => ErrorKind::Network,
            Self::Crypto(e) => match e {
                CryptoError::KeyFormat(_) => ErrorKind::KeyFormat,
                CryptoError::Decrypt => ErrorKind::Decrypt,
                CryptoError::Padding | CryptoError::UnalignedCiphertext(_) => ErrorKind::Padding,
                CryptoError::UnexpectedKeyLength { .. } => ErrorKind::Protocol,
                CryptoError::InvalidKeyLength { .. }
                | CryptoError::InvalidCiphertextLength { .. }
                | CryptoError::Encryption(_)
                | CryptoError::KeyGeneration(_) => ErrorKind::Validation,
            },
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Registration(_) => ErrorKind::Registration,
            Self::KeyExchange { .. } => ErrorKind::KeyExchange,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn key_exchange(reason: impl Into<String>) -> Self {
        Self::KeyExchange {
            reason: reason.into(),
            source: None,
        }
    }

    /// Classify an I/O failure. Timeouts and closed connections get their own messages.
    pub fn io(action: &'static str, timeout: Duration, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout {
                action,
                after: timeout,
            },
            io::ErrorKind::UnexpectedEof => Self::Network {
                action,
                source: io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"),
            },
            _ => Self::Network { action, source },
        }
    }
}

impl From<PacketError> for SessionError {
    fn from(e: PacketError) -> Self {
        if e.is_validation() {
            Self::Validation(e.to_string())
        } else {
            Self::Format(e)
        }
    }
}
