//! Table-driven endpoint built from per-command codecs.
//!
//! Instead of resolving `set_<command>` / `update_<command>` handlers by name
//! at runtime, a device driver registers one [`CommandCodec`] per command at
//! construction time. [`CodecEndpoint`] looks the codec up, encodes a frame,
//! hands it to a [`Transport`] and decodes the reply.
//!
//! # Example
//! ```rust,ignore
//! fn power_set(value: &Value, _: &Qualifier) -> anyhow::Result<Vec<u8>> {
//!     Ok(format!("PWR {}", value).into_bytes())
//! }
//! fn power_query(_: &Qualifier) -> anyhow::Result<Vec<u8>> {
//!     Ok(b"PWR?".to_vec())
//! }
//! fn power_decode(reply: &[u8], _: &Qualifier) -> anyhow::Result<Value> {
//!     Ok(Value::from(std::str::from_utf8(reply)?.trim_start_matches("PWR=")))
//! }
//!
//! let endpoint = CodecEndpoint::new("projector", link).with_command(
//!     "Power",
//!     CommandCodec::new()
//!         .with_set(power_set)
//!         .with_query(power_query, power_decode),
//! );
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;

use crate::endpoint::CommandEndpoint;
use crate::transport::Transport;
use crate::value::{Qualifier, Value};

/// Encodes a `set` frame.
pub type EncodeSetFn = fn(&Value, &Qualifier) -> Result<Vec<u8>>;
/// Encodes a status query frame.
pub type EncodeQueryFn = fn(&Qualifier) -> Result<Vec<u8>>;
/// Decodes a reply frame into a value.
pub type DecodeFn = fn(&[u8], &Qualifier) -> Result<Value>;

/// Wire handlers for one command. Missing handlers make it read- or write-only.
#[derive(Clone, Copy, Default)]
pub struct CommandCodec {
    encode_set: Option<EncodeSetFn>,
    encode_query: Option<EncodeQueryFn>,
    decode: Option<DecodeFn>,
}

impl CommandCodec {
    /// Codec with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the command settable.
    pub fn with_set(mut self, encode: EncodeSetFn) -> Self {
        self.encode_set = Some(encode);
        self
    }

    /// Make the command queryable.
    pub fn with_query(mut self, encode: EncodeQueryFn, decode: DecodeFn) -> Self {
        self.encode_query = Some(encode);
        self.decode = Some(decode);
        self
    }

    /// Whether `set` is supported.
    pub fn can_set(&self) -> bool {
        self.encode_set.is_some()
    }

    /// Whether `update` is supported.
    pub fn can_query(&self) -> bool {
        self.encode_query.is_some() && self.decode.is_some()
    }
}

impl std::fmt::Debug for CommandCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCodec")
            .field("set", &self.can_set())
            .field("query", &self.can_query())
            .finish()
    }
}

/// [`CommandEndpoint`] driven by a codec table over a [`Transport`].
pub struct CodecEndpoint<T: Transport> {
    device: String,
    transport: T,
    codecs: HashMap<String, CommandCodec>,
}

impl<T: Transport> CodecEndpoint<T> {
    /// Endpoint with an empty codec table.
    pub fn new(device: impl Into<String>, transport: T) -> Self {
        Self {
            device: device.into(),
            transport,
            codecs: HashMap::new(),
        }
    }

    /// Register the codec for `command`, replacing any previous one.
    pub fn with_command(mut self, command: impl Into<String>, codec: CommandCodec) -> Self {
        self.codecs.insert(command.into(), codec);
        self
    }

    /// Registered codec for `command`.
    pub fn codec(&self, command: &str) -> Option<&CommandCodec> {
        self.codecs.get(command)
    }

    fn lookup(&self, command: &str) -> Result<&CommandCodec> {
        self.codecs
            .get(command)
            .ok_or_else(|| anyhow!("No codec registered for '{}' on '{}'", command, self.device))
    }
}

#[async_trait]
impl<T: Transport> CommandEndpoint for CodecEndpoint<T> {
    async fn set(&self, command: &str, value: &Value, qualifier: &Qualifier) -> Result<()> {
        let encode = self
            .lookup(command)?
            .encode_set
            .ok_or_else(|| anyhow!("Command '{}' is read-only", command))?;
        let frame = encode(value, qualifier)
            .with_context(|| format!("Failed to encode {command} = {value}"))?;
        self.transport.send(&frame).await
    }

    async fn update(&self, command: &str, qualifier: &Qualifier) -> Result<Option<Value>> {
        let codec = self.lookup(command)?;
        let (Some(encode), Some(decode)) = (codec.encode_query, codec.decode) else {
            return Err(anyhow!("Command '{}' is write-only", command));
        };
        let frame = encode(qualifier).with_context(|| format!("Failed to encode {command} query"))?;

        let Some(reply) = self.transport.request(&frame).await? else {
            return Ok(None);
        };
        decode(&reply, qualifier)
            .map(Some)
            .with_context(|| format!("Failed to decode {command} reply {:?}", String::from_utf8_lossy(&reply)))
    }
}
