//! Connection liveness inferred from poll outcomes.
//!
//! Most control endpoints have no heartbeat. The only evidence a device is
//! alive is that it keeps answering queries, so the tracker counts
//! consecutive unanswered polls and declares the device disconnected once the
//! count exceeds a threshold. The threshold has to be tuned against the polling
//! cadence: a device polled every 10 s with a threshold of 15 needs roughly
//! 2.5 minutes of silence before it is reported down.
//!
//! The counter is per device, shared by every command polled on it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::Value;

/// Default number of tolerated consecutive misses.
pub const DEFAULT_MISS_THRESHOLD: u32 = 15;

/// Inferred connectivity of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Responding to polls (or never polled yet)
    Connected,
    /// Too many consecutive polls went unanswered
    Disconnected,
}

impl ConnectionState {
    /// Status value published under `ConnectionStatus`.
    pub fn as_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => f.write_str("Connected"),
            ConnectionState::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// Counter-based liveness state machine for one device.
#[derive(Debug, Clone)]
pub struct ConnectionLivenessTracker {
    state: ConnectionState,
    consecutive_misses: u32,
    miss_threshold: u32,
    unidirectional: bool,
}

impl ConnectionLivenessTracker {
    /// Optimistically connected tracker with the given threshold.
    pub fn new(miss_threshold: u32) -> Self {
        Self {
            state: ConnectionState::Connected,
            consecutive_misses: 0,
            miss_threshold,
            unidirectional: false,
        }
    }

    /// Tracker for a send-only device: permanently connected, never counts.
    pub fn unidirectional() -> Self {
        Self {
            unidirectional: true,
            ..Self::new(DEFAULT_MISS_THRESHOLD)
        }
    }

    /// A poll was answered.
    ///
    /// Returns `Some(Connected)` if this restored a disconnected device.
    pub fn record_success(&mut self) -> Option<ConnectionState> {
        if self.unidirectional {
            return None;
        }
        self.consecutive_misses = 0;
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connected;
            return Some(ConnectionState::Connected);
        }
        None
    }

    /// A poll went unanswered.
    ///
    /// Returns `Some(Disconnected)` exactly once per outage, on the miss that
    /// pushes the counter past the threshold.
    pub fn record_timeout(&mut self) -> Option<ConnectionState> {
        if self.unidirectional {
            return None;
        }
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        if self.consecutive_misses > self.miss_threshold
            && self.state == ConnectionState::Connected
        {
            self.state = ConnectionState::Disconnected;
            return Some(ConnectionState::Disconnected);
        }
        None
    }

    /// Current inferred state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Unanswered polls since the last success.
    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    /// Configured threshold.
    pub fn miss_threshold(&self) -> u32 {
        self.miss_threshold
    }

    /// Whether this tracker belongs to a send-only device.
    pub fn is_unidirectional(&self) -> bool {
        self.unidirectional
    }
}

impl Default for ConnectionLivenessTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MISS_THRESHOLD)
    }
}
