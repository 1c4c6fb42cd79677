//! The node tree
//!
//! Pure tree operations over a root directory: lookup, recursive put with
//! merge-or-replace semantics, subtree delete, and leaf traversal. Every
//! mutation reports its observable effect as a per-leaf event diff of the
//! affected subtree, computed from the flattened view before and after.
//! Callers hold the store lock; nothing here is synchronized.

use crate::event::Event;
use metatree_common::{path, Error, Result, Value};
use std::collections::BTreeMap;

/// A node is either a scalar leaf or a directory of named children.
#[derive(Clone, Debug)]
pub(crate) enum Node {
    Leaf(String),
    Dir(BTreeMap<String, Node>),
}

impl Node {
    fn empty_dir() -> Node {
        Node::Dir(BTreeMap::new())
    }

    /// Materialize a deep copy with no aliasing into the live tree.
    pub(crate) fn to_value(&self) -> Value {
        match self {
            Node::Leaf(s) => Value::Leaf(s.clone()),
            Node::Dir(children) => Value::Dir(
                children
                    .iter()
                    .map(|(name, child)| (name.clone(), child.to_value()))
                    .collect(),
            ),
        }
    }

    /// Visit every leaf under this node in path order.
    fn visit_leaves(&self, prefix: &str, visit: &mut dyn FnMut(&str, &str)) {
        match self {
            Node::Leaf(value) => visit(prefix, value),
            Node::Dir(children) => {
                for (name, child) in children {
                    child.visit_leaves(&path::join(prefix, name), visit);
                }
            }
        }
    }

    fn flatten(&self, prefix: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.visit_leaves(prefix, &mut |p, v| {
            out.insert(p.to_string(), v.to_string());
        });
        out
    }
}

/// Look up `npath` and materialize its value, or `None` when absent.
pub(crate) fn get_value(root: &BTreeMap<String, Node>, npath: &str) -> Option<Value> {
    let segs = path::segments(npath);
    if segs.is_empty() {
        return Some(Value::Dir(
            root.iter()
                .map(|(name, child)| (name.clone(), child.to_value()))
                .collect(),
        ));
    }
    let mut cur = root;
    for (i, seg) in segs.iter().enumerate() {
        match cur.get(*seg) {
            Some(node) if i == segs.len() - 1 => return Some(node.to_value()),
            Some(Node::Dir(children)) => cur = children,
            _ => return None,
        }
    }
    None
}

/// Visit every leaf under `npath` in path order, with absolute paths.
pub(crate) fn walk(root: &BTreeMap<String, Node>, npath: &str, visit: &mut dyn FnMut(&str, &str)) {
    let segs = path::segments(npath);
    let mut cur = root;
    for (i, seg) in segs.iter().enumerate() {
        match cur.get(*seg) {
            Some(node) if i == segs.len() - 1 => {
                node.visit_leaves(npath, visit);
                return;
            }
            Some(Node::Dir(children)) => cur = children,
            _ => return,
        }
    }
    for (name, child) in cur {
        child.visit_leaves(&path::join(npath, name), visit);
    }
}

/// Set `npath` to `value`, creating missing ancestor directories.
///
/// Leaf values set or replace the target leaf. Directory values merge into
/// an existing directory (`replace=false`, children absent from `value` are
/// preserved) or wipe it first (`replace=true`). Changing the target's kind
/// requires `replace=true`; an existing leaf on the ancestor path always
/// conflicts. Appends one event per leaf whose observable value changed.
pub(crate) fn put(
    root: &mut BTreeMap<String, Node>,
    npath: &str,
    value: &Value,
    replace: bool,
    events: &mut Vec<Event>,
) -> Result<()> {
    let segs = path::segments(npath);
    if segs.is_empty() {
        // The root is always a directory.
        let Value::Dir(children) = value else {
            return Err(Error::KindConflict("/".to_string()));
        };
        let old_flat = flatten_dir(root, "/");
        if replace {
            root.clear();
        }
        merge_dir(root, children);
        let new_flat = flatten_dir(root, "/");
        diff_events(&old_flat, &new_flat, events);
        return Ok(());
    }

    check_put(root, &segs, npath, value, replace)?;

    let mut cur = root;
    let mut walked = String::from("/");
    for seg in &segs[..segs.len() - 1] {
        walked = path::join(&walked, seg);
        cur = match cur.entry((*seg).to_string()).or_insert_with(Node::empty_dir) {
            Node::Dir(children) => children,
            Node::Leaf(_) => return Err(Error::KindConflict(walked)),
        };
    }

    let name = segs[segs.len() - 1];
    let old_flat = cur
        .get(name)
        .map(|node| node.flatten(npath))
        .unwrap_or_default();

    match value {
        Value::Leaf(s) => {
            cur.insert(name.to_string(), Node::Leaf(s.clone()));
        }
        Value::Dir(children) => match cur.get_mut(name) {
            Some(Node::Dir(existing)) => {
                if replace {
                    existing.clear();
                }
                merge_dir(existing, children);
            }
            _ => {
                let mut fresh = BTreeMap::new();
                merge_dir(&mut fresh, children);
                cur.insert(name.to_string(), Node::Dir(fresh));
            }
        },
    }

    let new_flat = cur
        .get(name)
        .map(|node| node.flatten(npath))
        .unwrap_or_default();
    diff_events(&old_flat, &new_flat, events);
    Ok(())
}

/// Remove the subtree (`dir=true`) or leaf (`dir=false`) at `npath`.
///
/// Returns whether anything was removed; an absent target is a no-op. A
/// kind mismatch between `dir` and the target fails. Appends one delete
/// event per removed leaf.
pub(crate) fn delete(
    root: &mut BTreeMap<String, Node>,
    npath: &str,
    dir: bool,
    events: &mut Vec<Event>,
) -> Result<bool> {
    let segs = path::segments(npath);
    if segs.is_empty() {
        if !dir {
            return Err(Error::KindConflict("/".to_string()));
        }
        let old = std::mem::take(root);
        let old_flat = flatten_dir(&old, "/");
        for p in old_flat.keys() {
            events.push(Event::delete(p));
        }
        return Ok(!old_flat.is_empty());
    }

    let mut cur = root;
    for seg in &segs[..segs.len() - 1] {
        match cur.get_mut(*seg) {
            Some(Node::Dir(children)) => cur = children,
            _ => return Ok(false),
        }
    }

    let name = segs[segs.len() - 1];
    match cur.get(name) {
        None => Ok(false),
        Some(Node::Leaf(_)) if dir => Err(Error::KindConflict(npath.to_string())),
        Some(Node::Dir(_)) if !dir => Err(Error::KindConflict(npath.to_string())),
        Some(node) => {
            let old_flat = node.flatten(npath);
            cur.remove(name);
            for p in old_flat.keys() {
                events.push(Event::delete(p));
            }
            Ok(true)
        }
    }
}

/// Pre-flight kind checks so a failing put leaves the tree untouched.
fn check_put(
    root: &BTreeMap<String, Node>,
    segs: &[&str],
    npath: &str,
    value: &Value,
    replace: bool,
) -> Result<()> {
    let mut cur = root;
    let mut walked = String::from("/");
    for (i, seg) in segs.iter().enumerate() {
        walked = path::join(&walked, seg);
        let last = i == segs.len() - 1;
        match cur.get(*seg) {
            // Everything below will be created fresh.
            None => return Ok(()),
            Some(Node::Leaf(_)) if !last => return Err(Error::KindConflict(walked)),
            Some(Node::Leaf(_)) => {
                if value.is_dir() && !replace {
                    return Err(Error::KindConflict(npath.to_string()));
                }
                return Ok(());
            }
            Some(Node::Dir(children)) => {
                if last {
                    if !value.is_dir() && !replace {
                        return Err(Error::KindConflict(npath.to_string()));
                    }
                    return Ok(());
                }
                cur = children;
            }
        }
    }
    Ok(())
}

/// Recursively merge `values` into `dir`; scalar entries always win, and a
/// kind change at a nested key replaces the old node.
fn merge_dir(dir: &mut BTreeMap<String, Node>, values: &BTreeMap<String, Value>) {
    for (name, value) in values {
        match value {
            Value::Leaf(s) => {
                dir.insert(name.clone(), Node::Leaf(s.clone()));
            }
            Value::Dir(children) => match dir.get_mut(name) {
                Some(Node::Dir(existing)) => merge_dir(existing, children),
                _ => {
                    let mut fresh = BTreeMap::new();
                    merge_dir(&mut fresh, children);
                    dir.insert(name.clone(), Node::Dir(fresh));
                }
            },
        }
    }
}

fn flatten_dir(dir: &BTreeMap<String, Node>, prefix: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, child) in dir {
        child.visit_leaves(&path::join(prefix, name), &mut |p, v| {
            out.insert(p.to_string(), v.to_string());
        });
    }
    out
}

/// Deletes for vanished leaves, then updates for added or changed leaves,
/// each group in path order.
fn diff_events(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
    events: &mut Vec<Event>,
) {
    for p in old.keys() {
        if !new.contains_key(p) {
            events.push(Event::delete(p));
        }
    }
    for (p, v) in new {
        if old.get(p) != Some(v) {
            events.push(Event::update(p, v));
        }
    }
}
