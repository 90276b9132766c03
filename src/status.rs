//! Per-device cache of last-known status values.
//!
//! The store keeps one value per (command, resolved qualifier) pair and
//! reports whether a write actually changed anything. Change detection is the
//! only dispatch trigger in the system: identical repeated poll responses are
//! absorbed here and never reach subscribers.
//!
//! The store itself is not synchronized. [`HardwareController`] owns one behind
//! a per-device mutex together with the liveness tracker, and applies the
//! "a changed write is evidence of liveness" rule on top of [`StatusStore::write`].
//!
//! [`HardwareController`]: crate::controller::HardwareController

use std::collections::HashMap;

use crate::command::{CommandSet, StatusKey};
use crate::error::{SyncError, SyncResult};
use crate::value::{Qualifier, Value};

/// One cached status value, as returned by [`StatusStore::snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    /// Command name
    pub command: String,
    /// Qualifier restricted to the command's declared parameters
    pub qualifier: Qualifier,
    /// Last written value
    pub value: Value,
}

struct Slot {
    qualifier: Qualifier,
    value: Value,
}

/// Last-known values for every command of one device.
pub struct StatusStore {
    device: String,
    commands: CommandSet,
    values: HashMap<String, HashMap<StatusKey, Slot>>,
}

impl StatusStore {
    /// Create an empty store for the given device and command table.
    pub fn new(device: impl Into<String>, commands: CommandSet) -> Self {
        Self {
            device: device.into(),
            commands,
            values: HashMap::new(),
        }
    }

    /// Store `value` for `command` under `qualifier`.
    ///
    /// Returns `Ok(true)` when the value is new or differs from the cached one.
    /// A qualifier missing one of the command's declared parameters is dropped
    /// silently and reported as unchanged.
    ///
    /// # Errors
    /// [`SyncError::UnknownCommand`] when `command` is not declared.
    pub fn write(&mut self, command: &str, qualifier: &Qualifier, value: Value) -> SyncResult<bool> {
        let descriptor = self
            .commands
            .get(command)
            .ok_or_else(|| SyncError::UnknownCommand {
                device: self.device.clone(),
                command: command.to_string(),
            })?;

        let Some(key) = descriptor.resolve(qualifier) else {
            tracing::trace!(
                device = %self.device,
                command,
                %qualifier,
                "Dropping status write with unresolved qualifier"
            );
            return Ok(false);
        };

        let slots = self.values.entry(command.to_string()).or_default();
        match slots.get_mut(&key) {
            Some(slot) if slot.value == value => Ok(false),
            Some(slot) => {
                slot.value = value;
                Ok(true)
            }
            None => {
                let mut projected = Qualifier::new();
                for param in &descriptor.qualifiers {
                    if let Some(v) = qualifier.get(param) {
                        projected.insert(param.clone(), v.clone());
                    }
                }
                slots.insert(
                    key,
                    Slot {
                        qualifier: projected,
                        value,
                    },
                );
                Ok(true)
            }
        }
    }

    /// Last-known value, or `None` when unknown or unresolvable.
    pub fn read(&self, command: &str, qualifier: &Qualifier) -> Option<Value> {
        let key = self.commands.get(command)?.resolve(qualifier)?;
        self.values
            .get(command)
            .and_then(|slots| slots.get(&key))
            .map(|slot| slot.value.clone())
    }

    /// Every cached value, ordered by command name.
    pub fn snapshot(&self) -> Vec<StatusEntry> {
        let mut entries: Vec<StatusEntry> = self
            .values
            .iter()
            .flat_map(|(command, slots)| {
                slots.values().map(move |slot| StatusEntry {
                    command: command.clone(),
                    qualifier: slot.qualifier.clone(),
                    value: slot.value.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            a.command
                .cmp(&b.command)
                .then_with(|| a.qualifier.to_string().cmp(&b.qualifier.to_string()))
        });
        entries
    }

    /// The command table this store resolves against.
    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandDescriptor;

    fn store() -> StatusStore {
        StatusStore::new(
            "dsp",
            CommandSet::new([
                CommandDescriptor::new("Power"),
                CommandDescriptor::with_qualifiers("Volume", ["Device ID"]),
                CommandDescriptor::with_qualifiers("Route", ["Output", "Input"]),
            ]),
        )
    }

    #[test]
    fn read_after_write_returns_last_value() {
        let mut s = store();
        let q = Qualifier::from([("Device ID", "2")]);
        assert!(s.write("Volume", &q, Value::from(10)).unwrap());
        assert!(s.write("Volume", &q, Value::from(30)).unwrap());
        assert_eq!(s.read("Volume", &q), Some(Value::from(30)));
    }

    #[test]
    fn identical_write_reports_unchanged() {
        let mut s = store();
        assert!(s.write("Power", &Qualifier::new(), "On".into()).unwrap());
        assert!(!s.write("Power", &Qualifier::new(), "On".into()).unwrap());
        assert!(s.write("Power", &Qualifier::new(), "Off".into()).unwrap());
    }

    #[test]
    fn write_with_missing_parameter_is_dropped() {
        let mut s = store();
        let partial = Qualifier::from([("Output", 1)]);
        assert!(!s.write("Route", &partial, Value::from(4)).unwrap());
        assert!(s.snapshot().is_empty());
    }

    #[test]
    fn read_with_missing_or_other_parameter_is_unknown() {
        let mut s = store();
        let full = Qualifier::from([("Output", 1), ("Input", 2)]);
        s.write("Route", &full, Value::from(true)).unwrap();
        assert_eq!(s.read("Route", &Qualifier::from([("Output", 1)])), None);
        assert_eq!(s.read("Route", &Qualifier::from([("Output", 1), ("Input", 3)])), None);
        assert_eq!(s.read("Route", &full), Some(Value::from(true)));
    }

    #[test]
    fn unknown_command_write_errors_but_read_is_unknown() {
        let mut s = store();
        let err = s.write("Warp", &Qualifier::new(), Value::from(1)).unwrap_err();
        assert!(matches!(err, SyncError::UnknownCommand { .. }));
        assert_eq!(s.read("Warp", &Qualifier::new()), None);
    }

    #[test]
    fn snapshot_projects_qualifier_to_declared_parameters() {
        let mut s = store();
        let q = Qualifier::from([("Device ID", "2")]).with("Extra", 9);
        s.write("Volume", &q, Value::from(5)).unwrap();
        let snap = s.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].qualifier, Qualifier::from([("Device ID", "2")]));
    }
}
