//! Session event sinks

use super::state::SessionState;
use tracing::{debug, info, warn};

/// Receives session events. Handed to the session at construction.
pub trait SessionObserver: Send {
    fn on_transition(&self, from: SessionState, to: SessionState);

    fn on_packet_sent(&self, _packet_number: u16, _total_packets: u16) {}
}

/// Logs session events through `tracing`
#[derive(Debug, Clone)]
pub struct TracingObserver {
    label: String,
}

impl TracingObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl SessionObserver for TracingObserver {
    fn on_transition(&self, from: SessionState, to: SessionState) {
        match to {
            SessionState::Failed(_) => warn!(job = %self.label, "Session {} -> {}", from, to),
            _ => info!(job = %self.label, "Session {} -> {}", from, to),
        }
    }

    fn on_packet_sent(&self, packet_number: u16, total_packets: u16) {
        debug!(job = %self.label, "Sent packet {}/{}", packet_number, total_packets);
    }
}
