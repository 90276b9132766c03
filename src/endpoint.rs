//! Endpoint capability consumed by device controllers.
//!
//! A [`CommandEndpoint`] is the vendor-specific boundary: it turns an abstract
//! command, qualifier and value into wire traffic and back. Controllers never
//! see bytes; they only see the outcome of a `set` or an `update`.
//!
//! # Contract
//! - `set` sends a command and returns once the transport accepted it. It does
//!   not imply the device applied the value.
//! - `update` queries the current value. `Ok(None)` means the device did not
//!   answer in time, which is an expected outcome fed to liveness tracking,
//!   not an error.
//! - `Err` is reserved for codec or transport failures.
//! - Implementations use interior mutability; every method takes `&self`.

use anyhow::Result;
use async_trait::async_trait;

use crate::value::{Qualifier, Value};

/// Vendor codec and transport for one device.
#[async_trait]
pub trait CommandEndpoint: Send + Sync {
    /// Send `value` for `command` to the device.
    async fn set(&self, command: &str, value: &Value, qualifier: &Qualifier) -> Result<()>;

    /// Query the current value of `command`.
    ///
    /// # Returns
    /// - `Ok(Some(value))` when the device answered
    /// - `Ok(None)` on timeout or no response
    async fn update(&self, command: &str, qualifier: &Qualifier) -> Result<Option<Value>>;
}
