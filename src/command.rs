//! Command descriptors and qualifier resolution.
//!
//! Every device declares up front which commands it understands and, for each,
//! the ordered list of qualifier parameters that select one instance of the
//! command. The declaration is immutable once the device is built.
//!
//! Status and subscription tables are flat maps keyed by [`StatusKey`], a
//! composite string of the qualifier values in declared parameter order. Each
//! segment carries its type and length, so no value can forge a boundary. A
//! qualifier that misses a declared parameter does not resolve at all, so a
//! partially specified lookup can never land on the wrong entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::value::{Qualifier, Value};

/// Name of the implicit liveness command present on every device.
pub const CONNECTION_STATUS: &str = "ConnectionStatus";

/// Static description of one device command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    /// Command name, unique per device
    pub name: String,
    /// Qualifier parameter names in nesting order
    #[serde(default)]
    pub qualifiers: Vec<String>,
}

impl CommandDescriptor {
    /// Command without qualifier parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            qualifiers: Vec::new(),
        }
    }

    /// Command keyed by the given qualifier parameters, in order.
    pub fn with_qualifiers<I, S>(name: impl Into<String>, qualifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            qualifiers: qualifiers.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve a qualifier into this command's composite key.
    ///
    /// Returns `None` when any declared parameter is missing from `qualifier`.
    pub fn resolve(&self, qualifier: &Qualifier) -> Option<StatusKey> {
        let mut key = String::new();
        for param in &self.qualifiers {
            push_segment(&mut key, qualifier.get(param)?);
        }
        Some(StatusKey(key))
    }
}

fn push_segment(key: &mut String, value: &Value) {
    // Type tag prevents "2" and 2 from sharing a slot.
    let tag = match value {
        Value::Bool(_) => 'b',
        Value::Int(_) => 'i',
        Value::Float(_) => 'f',
        Value::Text(_) => 's',
    };
    let text = value.to_string();
    key.push(tag);
    key.push_str(&text.len().to_string());
    key.push(':');
    key.push_str(&text);
}

/// Flattened, order-stable key of a resolved qualifier path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusKey(String);

impl StatusKey {
    /// Key of a command without qualifier parameters.
    pub fn root() -> Self {
        StatusKey(String::new())
    }
}

/// Immutable table of the commands one device supports.
///
/// Always contains [`CONNECTION_STATUS`], declared without qualifiers.
#[derive(Debug, Clone)]
pub struct CommandSet {
    commands: Arc<HashMap<String, CommandDescriptor>>,
}

impl CommandSet {
    /// Build the table. Later duplicates of a name replace earlier ones.
    pub fn new(descriptors: impl IntoIterator<Item = CommandDescriptor>) -> Self {
        let mut commands: HashMap<String, CommandDescriptor> = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        commands
            .entry(CONNECTION_STATUS.to_string())
            .or_insert_with(|| CommandDescriptor::new(CONNECTION_STATUS));
        Self {
            commands: Arc::new(commands),
        }
    }

    /// Look up a command.
    pub fn get(&self, name: &str) -> Option<&CommandDescriptor> {
        self.commands.get(name)
    }

    /// Whether `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Number of declared commands, including `ConnectionStatus`.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Always false: `ConnectionStatus` is implicit.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Iterate over declared commands in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_uses_declared_order_not_qualifier_order() {
        let route = CommandDescriptor::with_qualifiers("Route", ["Output", "Input"]);
        let a = route.resolve(&Qualifier::from([("Input", 1), ("Output", 2)]));
        let b = route.resolve(&Qualifier::from([("Output", 1), ("Input", 2)]));
        assert!(a.is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_fails_on_missing_parameter() {
        let route = CommandDescriptor::with_qualifiers("Route", ["Output", "Input"]);
        assert!(route.resolve(&Qualifier::from([("Output", 2)])).is_none());
        assert!(route.resolve(&Qualifier::new()).is_none());
    }

    #[test]
    fn unqualified_command_resolves_to_root_and_ignores_extras() {
        let power = CommandDescriptor::new("Power");
        assert_eq!(power.resolve(&Qualifier::new()), Some(StatusKey::root()));
        assert_eq!(
            power.resolve(&Qualifier::from([("Device ID", "2")])),
            Some(StatusKey::root())
        );
    }

    #[test]
    fn text_and_numeric_segments_do_not_collide() {
        let volume = CommandDescriptor::with_qualifiers("Volume", ["Device ID"]);
        let text = volume.resolve(&Qualifier::from([("Device ID", "2")]));
        let int = volume.resolve(&Qualifier::from([("Device ID", 2)]));
        assert_ne!(text, int);
    }

    #[test]
    fn values_containing_key_syntax_do_not_collide() {
        let route = CommandDescriptor::with_qualifiers("Route", ["Output", "Input"]);
        let a = route.resolve(&Qualifier::from([("Output", "x\u{1f}s:y"), ("Input", "z")]));
        let b = route.resolve(&Qualifier::from([("Output", "x"), ("Input", "y\u{1f}s:z")]));
        let c = route.resolve(&Qualifier::from([("Output", "x1:s"), ("Input", "")]));
        let d = route.resolve(&Qualifier::from([("Output", "x"), ("Input", "1:s")]));
        assert_ne!(a, b);
        assert_ne!(c, d);
    }

    #[test]
    fn command_set_always_declares_connection_status() {
        let set = CommandSet::new([CommandDescriptor::new("Power")]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(CONNECTION_STATUS));
        assert!(set.get(CONNECTION_STATUS).is_some_and(|d| d.qualifiers.is_empty()));
    }
}
