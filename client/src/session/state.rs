//! Session lifecycle states

use super::error::ErrorKind;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Registering,
    KeyExchanging,
    Transferring,
    AwaitingConfirmation,
    Completed,
    Failed(ErrorKind),
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Completed | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Idle, Registering)
            | (Registering, KeyExchanging)
            | (KeyExchanging, Transferring)
            | (Transferring, AwaitingConfirmation)
            | (AwaitingConfirmation, Transferring)
            | (AwaitingConfirmation, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Registering => f.write_str("registering"),
            Self::KeyExchanging => f.write_str("key exchanging"),
            Self::Transferring => f.write_str("transferring"),
            Self::AwaitingConfirmation => f.write_str("awaiting confirmation"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}
