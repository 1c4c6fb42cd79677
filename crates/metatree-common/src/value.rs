//! Tree value model
//!
//! Values are heterogeneous: a node is either a scalar string leaf or a
//! directory of named children. The tagged variant keeps the projection
//! engine and validators on explicit branches instead of downcasts.

use crate::path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A materialized tree value: a string leaf or a directory of children.
///
/// Directories are unordered; `BTreeMap` is used so iteration (and anything
/// derived from it, like change-event order) is deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Leaf(String),
    Dir(BTreeMap<String, Value>),
}

impl Value {
    /// An empty directory.
    pub fn dir() -> Self {
        Value::Dir(BTreeMap::new())
    }

    /// A leaf holding `value`.
    pub fn leaf(value: impl Into<String>) -> Self {
        Value::Leaf(value.into())
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Value::Dir(_))
    }

    /// The leaf string, if this is a leaf.
    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            Value::Leaf(s) => Some(s),
            Value::Dir(_) => None,
        }
    }

    /// The children, if this is a directory.
    pub fn as_dir(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Leaf(_) => None,
            Value::Dir(children) => Some(children),
        }
    }

    /// Flatten to a map of `/`-prefixed relative paths to leaf values.
    ///
    /// A leaf flattens to a single `"/"` entry; empty directories vanish.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.flatten_into("/", &mut out);
        out
    }

    fn flatten_into(&self, prefix: &str, out: &mut BTreeMap<String, String>) {
        match self {
            Value::Leaf(s) => {
                out.insert(prefix.to_string(), s.clone());
            }
            Value::Dir(children) => {
                for (name, child) in children {
                    child.flatten_into(&path::join(prefix, name), out);
                }
            }
        }
    }

    /// Rebuild a nested directory from a flat path→leaf map.
    ///
    /// The inverse of [`Value::flatten`] for directory-shaped input. When a
    /// path is both a leaf and a prefix of another entry, the deeper entry
    /// wins.
    pub fn expand(flat: &BTreeMap<String, String>) -> Value {
        let mut root = BTreeMap::new();
        for (p, leaf) in flat {
            let segs = path::segments(p);
            if segs.is_empty() {
                continue;
            }
            insert_at(&mut root, &segs, leaf);
        }
        Value::Dir(root)
    }

    /// Convert from JSON, coercing scalars to strings.
    ///
    /// Objects become directories, arrays become directories keyed by index,
    /// numbers and booleans are stringified, and `null` becomes an empty
    /// leaf.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Leaf(String::new()),
            serde_json::Value::Bool(b) => Value::Leaf(b.to_string()),
            serde_json::Value::Number(n) => Value::Leaf(n.to_string()),
            serde_json::Value::String(s) => Value::Leaf(s),
            serde_json::Value::Array(items) => Value::Dir(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| (i.to_string(), Value::from_json(item)))
                    .collect(),
            ),
            serde_json::Value::Object(entries) => Value::Dir(
                entries
                    .into_iter()
                    .map(|(key, item)| (key, Value::from_json(item)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON: leaves become strings, directories become objects.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Leaf(s) => serde_json::Value::String(s.clone()),
            Value::Dir(children) => serde_json::Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Leaf(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Leaf(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(children: BTreeMap<String, Value>) -> Self {
        Value::Dir(children)
    }
}

fn insert_at(dir: &mut BTreeMap<String, Value>, segs: &[&str], leaf: &str) {
    if segs.len() == 1 {
        dir.insert(segs[0].to_string(), Value::leaf(leaf));
        return;
    }
    let child = dir
        .entry(segs[0].to_string())
        .or_insert_with(Value::dir);
    if !child.is_dir() {
        *child = Value::dir();
    }
    if let Value::Dir(children) = child {
        insert_at(children, &segs[1..], leaf);
    }
}
