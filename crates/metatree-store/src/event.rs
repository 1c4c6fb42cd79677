//! Change events emitted by the store

use derive_more::Display;

/// What happened to a leaf
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Action {
    /// Leaf created or its value changed
    #[display("update")]
    Update,
    /// Leaf removed
    #[display("delete")]
    Delete,
}

/// A single change to one leaf of the tree.
///
/// `path` is absolute when the store produces the event; delivery rewrites
/// it relative to the receiving watcher's root, so a watcher bound directly
/// to a leaf sees its events at `"/"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub action: Action,
    pub path: String,
    pub value: String,
}

impl Event {
    /// An update event carrying the new leaf value
    pub fn update(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action: Action::Update,
            path: path.into(),
            value: value.into(),
        }
    }

    /// A delete event; the value is empty
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            action: Action::Delete,
            path: path.into(),
            value: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_names() {
        assert_eq!(Action::Update.to_string(), "update");
        assert_eq!(Action::Delete.to_string(), "delete");
    }

    #[test]
    fn test_event_constructors() {
        let up = Event::update("/a", "1");
        assert_eq!(up.action, Action::Update);
        assert_eq!(up.value, "1");
        let del = Event::delete("/a");
        assert_eq!(del.action, Action::Delete);
        assert!(del.value.is_empty());
    }
}
