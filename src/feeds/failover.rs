use tracing::{info, warn};

use crate::engine::types::ConnectionState;
use crate::market_data::adapters::NORMAL_CLOSURE;
use crate::telemetry::STREAM_FAILOVERS;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamLifecycle {
    Opened,
    TransportError(String),
    Closed { code: u16 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recovery {
    pub reason: String,
}

impl Recovery {
    pub fn message(&self) -> String {
        format!("Live stream unavailable, falling back to REST data: {}", self.reason)
    }
}

/// Watches one subscription and decides when to fall back to REST.
///
/// Recovery is one-shot: the first error or abnormal close yields a single
/// [`Recovery`], after which the subscription stays degraded and later
/// events are ignored. A 1000 close is an expected teardown.
#[derive(Debug, Default)]
pub struct FailoverController {
    state: ConnectionState,
    recovered: bool,
}

impl FailoverController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn observe(&mut self, event: StreamLifecycle) -> Option<Recovery> {
        match event {
            StreamLifecycle::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Live;
                }
                None
            }
            StreamLifecycle::TransportError(reason) => self.degrade(reason),
            StreamLifecycle::Closed { code } if code == NORMAL_CLOSURE => {
                if self.state != ConnectionState::Degraded {
                    info!("Stream closed normally");
                    self.state = ConnectionState::Closed;
                }
                None
            }
            StreamLifecycle::Closed { code } => {
                self.degrade(format!("connection closed with code {}", code))
            }
        }
    }

    // Local teardown: never triggers recovery
    pub fn shutdown(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn degrade(&mut self, reason: String) -> Option<Recovery> {
        if self.recovered || self.state == ConnectionState::Closed {
            return None;
        }
        self.recovered = true;
        self.state = ConnectionState::Degraded;
        metrics::counter!(STREAM_FAILOVERS).increment(1);
        warn!(reason = %reason, "Stream failed, degrading to REST");
        Some(Recovery { reason })
    }
}
