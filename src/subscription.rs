//! Subscriber callbacks keyed by (command, qualifier path).
//!
//! At most one callback is bound per exact path. Dispatch never bubbles: a
//! change on `Volume {Device ID=3}` does not reach a callback bound to
//! `Volume {Device ID=2}`, nor one bound to an ancestor path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::{CommandSet, StatusKey};
use crate::error::{SyncError, SyncResult};
use crate::value::{Qualifier, Value};

/// Callback invoked with `(command, value, qualifier)` on every status change.
pub type StatusCallback = Arc<dyn Fn(&str, &Value, &Qualifier) + Send + Sync>;

/// Maps resolved (command, qualifier) paths to their callback.
pub struct SubscriptionRegistry {
    device: String,
    commands: CommandSet,
    callbacks: HashMap<String, HashMap<StatusKey, StatusCallback>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry for the given device and command table.
    pub fn new(device: impl Into<String>, commands: CommandSet) -> Self {
        Self {
            device: device.into(),
            commands,
            callbacks: HashMap::new(),
        }
    }

    /// Bind `callback` to `command` under `qualifier`, replacing any previous one.
    ///
    /// Returns `Ok(false)` without registering when the qualifier lacks a
    /// declared parameter.
    ///
    /// # Errors
    /// [`SyncError::UnknownCommand`] when `command` is not declared.
    pub fn subscribe(
        &mut self,
        command: &str,
        qualifier: &Qualifier,
        callback: StatusCallback,
    ) -> SyncResult<bool> {
        let descriptor = self
            .commands
            .get(command)
            .ok_or_else(|| SyncError::UnknownCommand {
                device: self.device.clone(),
                command: command.to_string(),
            })?;

        let Some(key) = descriptor.resolve(qualifier) else {
            tracing::debug!(
                device = %self.device,
                command,
                %qualifier,
                "Ignoring subscription with unresolved qualifier"
            );
            return Ok(false);
        };

        self.callbacks
            .entry(command.to_string())
            .or_default()
            .insert(key, callback);
        Ok(true)
    }

    /// Remove the callback bound at the exact path. Returns whether one existed.
    pub fn unsubscribe(&mut self, command: &str, qualifier: &Qualifier) -> bool {
        let Some(key) = self.commands.get(command).and_then(|d| d.resolve(qualifier)) else {
            return false;
        };
        self.callbacks
            .get_mut(command)
            .is_some_and(|slots| slots.remove(&key).is_some())
    }

    /// Callback bound at the exact path, if any.
    ///
    /// Callers holding a lock around the registry clone the callback out and
    /// invoke it after releasing the lock.
    pub fn callback_for(&self, command: &str, qualifier: &Qualifier) -> Option<StatusCallback> {
        let key = self.commands.get(command)?.resolve(qualifier)?;
        self.callbacks.get(command)?.get(&key).cloned()
    }

    /// Invoke the callback bound at the exact path. Returns whether one fired.
    pub fn dispatch(&self, command: &str, value: &Value, qualifier: &Qualifier) -> bool {
        match self.callback_for(command, qualifier) {
            Some(callback) => {
                callback(command, value, qualifier);
                true
            }
            None => false,
        }
    }

    /// Number of bound callbacks across all commands.
    pub fn len(&self) -> usize {
        self.callbacks.values().map(HashMap::len).sum()
    }

    /// Whether no callbacks are bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
