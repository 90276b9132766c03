//! Custom error types for the runtime.
//!
//! `SyncError` is the single error type surfaced by the status store, the
//! subscription registry, device controllers and the polling scheduler. It
//! uses `thiserror` so callers can match on the variant and still get a
//! readable message.
//!
//! ## Error Hierarchy
//!
//! - **`UnsupportedCommand`**: `set`/`update` of a command the device never
//!   declared. A programmer error, surfaced immediately.
//! - **`UnknownCommand`**: subscribe or status write against an undeclared command.
//! - **`InvalidMode`**: a polling mode string other than `active`/`inactive`.
//! - **`Timeout`**: a `set` that got no acknowledgement within the device's
//!   response window. Poll timeouts are *not* errors; they feed the liveness
//!   tracker instead.
//! - **`Transport`**: a codec or transport failure reported by an endpoint.
//! - **`Config`** / **`Configuration`**: loading and semantic validation of
//!   configuration files.
//!
//! Unresolved qualifiers are deliberately absent: they are soft misses that
//! the store and registry drop silently.

use thiserror::Error;

/// Convenience alias for results using the runtime error type.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors raised by the synchronization runtime.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Command not declared for the device (set/update path).
    #[error("Device '{device}' does not support command '{command}'")]
    UnsupportedCommand {
        /// Device identifier
        device: String,
        /// Offending command name
        command: String,
    },

    /// Command not declared for the device (status/subscription path).
    #[error("Unknown command '{command}' for device '{device}'")]
    UnknownCommand {
        /// Device identifier
        device: String,
        /// Offending command name
        command: String,
    },

    /// Polling mode string that is neither `active` nor `inactive`.
    #[error("Invalid polling mode '{0}'. Must be one of: active, inactive")]
    InvalidMode(String),

    /// No response within the device's response timeout.
    #[error("Device '{device}' timed out on command '{command}'")]
    Timeout {
        /// Device identifier
        device: String,
        /// Command that timed out
        command: String,
    },

    /// Endpoint or transport failure.
    #[error("Transport error on device '{device}' ({command}): {message}")]
    Transport {
        /// Device identifier
        device: String,
        /// Command being executed
        command: String,
        /// Rendered error chain from the endpoint
        message: String,
    },

    /// Configuration file could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure outside of a device exchange.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for SyncError {
    fn from(value: figment::Error) -> Self {
        SyncError::Config(Box::new(value))
    }
}

impl SyncError {
    /// Wrap an endpoint failure for a given device and command.
    pub(crate) fn transport(device: &str, command: &str, err: &anyhow::Error) -> Self {
        SyncError::Transport {
            device: device.to_string(),
            command: command.to_string(),
            message: format!("{err:#}"),
        }
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::Timeout { .. } | SyncError::Transport { .. })
    }
}
