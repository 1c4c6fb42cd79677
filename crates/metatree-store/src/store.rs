//! Thread-safe store facade
//!
//! Combines the node tree and the watcher bus behind a single
//! readers-writer lock: concurrent readers, exclusive writers. A mutation
//! updates the tree and computes its event list under the write lock, then
//! dispatches to watcher queues after release; dispatch is serialized so
//! every watcher observes mutations in the order they completed. Delivery
//! is non-blocking: a watcher whose buffer is full is dropped and closed
//! rather than stalling the writer.

use crate::event::Event;
use crate::tree::{self, Node};
use crate::watch::Watcher;
use metatree_common::{path, Error, Result, Value};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Handle to one in-memory tree store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Store {
    core: Arc<StoreCore>,
}

pub(crate) struct StoreCore {
    state: RwLock<State>,
    /// Serializes post-lock event dispatch so per-watcher event order
    /// matches mutation order.
    dispatch: Mutex<()>,
}

struct State {
    root: BTreeMap<String, Node>,
    version: u64,
    watchers: HashMap<u64, WatcherEntry>,
    next_watcher_id: u64,
    closed: bool,
}

struct WatcherEntry {
    path: String,
    tx: mpsc::Sender<Event>,
}

/// Events routed to one watcher, already rebased to its root.
struct Delivery {
    watcher_id: u64,
    tx: mpsc::Sender<Event>,
    events: Vec<Event>,
}

impl Store {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self {
            core: Arc::new(StoreCore {
                state: RwLock::new(State {
                    root: BTreeMap::new(),
                    version: 0,
                    watchers: HashMap::new(),
                    next_watcher_id: 1,
                    closed: false,
                }),
                dispatch: Mutex::new(()),
            }),
        }
    }

    /// Look up `path` and return the current version with a deep-copied
    /// snapshot of its value; `(version, None)` when absent.
    pub fn get(&self, path_: &str) -> (u64, Option<Value>) {
        let npath = path::normalize(path_);
        let state = self.core.state.read();
        if state.closed {
            return (state.version, None);
        }
        (state.version, tree::get_value(&state.root, &npath))
    }

    /// Set `path` to `value`, creating missing ancestors.
    ///
    /// See the tree semantics for merge (`replace=false`) versus wipe
    /// (`replace=true`). Every successful put increments the version, even
    /// when the observable value did not change.
    pub fn put(&self, path_: &str, value: &Value, replace: bool) -> Result<()> {
        let npath = path::normalize(path_);
        let mut state = self.core.state.write();
        if state.closed {
            return Err(Error::StoreClosed);
        }
        let mut events = Vec::new();
        tree::put(&mut state.root, &npath, value, replace, &mut events)?;
        state.version += 1;
        self.finish_mutation(state, events);
        Ok(())
    }

    /// Remove the subtree (`dir=true`) or leaf (`dir=false`) at `path`.
    /// Absent targets are a no-op and do not bump the version.
    pub fn delete(&self, path_: &str, dir: bool) -> Result<()> {
        let npath = path::normalize(path_);
        let mut state = self.core.state.write();
        if state.closed {
            return Err(Error::StoreClosed);
        }
        let mut events = Vec::new();
        let removed = tree::delete(&mut state.root, &npath, dir, &mut events)?;
        if removed {
            state.version += 1;
            self.finish_mutation(state, events);
        }
        Ok(())
    }

    /// Subscribe to changes at or under `path` with a buffer of `buf`
    /// events. There is no back-replay of prior events.
    pub fn watch(&self, path_: &str, buf: usize) -> Result<Watcher> {
        let npath = path::normalize(path_);
        let mut state = self.core.state.write();
        if state.closed {
            return Err(Error::StoreClosed);
        }
        let id = state.next_watcher_id;
        state.next_watcher_id += 1;
        let (tx, rx) = mpsc::channel(buf.max(1));
        state.watchers.insert(
            id,
            WatcherEntry {
                path: npath.clone(),
                tx,
            },
        );
        debug!("watcher {} registered at {}", id, npath);
        Ok(Watcher {
            id,
            path: npath,
            rx,
            core: Arc::downgrade(&self.core),
        })
    }

    /// Visit every leaf at or under `path` in path order.
    pub fn walk<F: FnMut(&str, &str)>(&self, path_: &str, mut visit: F) {
        let npath = path::normalize(path_);
        let state = self.core.state.read();
        if state.closed {
            return;
        }
        tree::walk(&state.root, &npath, &mut visit);
    }

    /// The number of completed mutations
    pub fn version(&self) -> u64 {
        self.core.state.read().version
    }

    /// Close every watcher and empty the tree. Subsequent mutations and
    /// subscriptions fail with [`Error::StoreClosed`]; reads return nothing.
    pub fn destroy(&self) {
        let mut state = self.core.state.write();
        state.closed = true;
        state.root.clear();
        let count = state.watchers.len();
        state.watchers.clear();
        debug!("store destroyed, {} watchers closed", count);
    }

    /// Route events, hand the write lock off to the dispatch lock, and
    /// deliver. Taking the dispatch lock before releasing the state lock
    /// keeps dispatch in mutation order without blocking readers.
    fn finish_mutation(&self, state: parking_lot::RwLockWriteGuard<'_, State>, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let deliveries = route(&state.watchers, &events);
        let dispatch = self.core.dispatch.lock();
        drop(state);
        self.deliver(deliveries, dispatch);
    }

    fn deliver(&self, deliveries: Vec<Delivery>, dispatch: MutexGuard<'_, ()>) {
        let mut dead = Vec::new();
        for delivery in deliveries {
            for event in delivery.events {
                if delivery.tx.try_send(event).is_err() {
                    warn!(
                        "watcher {} cannot keep up, dropping it",
                        delivery.watcher_id
                    );
                    dead.push(delivery.watcher_id);
                    break;
                }
            }
        }
        // Removal takes the write lock, so the dispatch lock must go first.
        drop(dispatch);
        for id in dead {
            self.core.remove_watcher(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.core.state.read().watchers.len()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreCore {
    /// Deregister a watcher, closing its channel. Idempotent.
    pub(crate) fn remove_watcher(&self, id: u64) {
        let mut state = self.state.write();
        if state.watchers.remove(&id).is_some() {
            debug!("watcher {} removed", id);
        }
    }
}

fn route(watchers: &HashMap<u64, WatcherEntry>, events: &[Event]) -> Vec<Delivery> {
    watchers
        .iter()
        .filter_map(|(id, entry)| {
            let rebased: Vec<Event> = events
                .iter()
                .filter_map(|event| {
                    path::rebase(&event.path, &entry.path).map(|rel| Event {
                        action: event.action,
                        path: rel,
                        value: event.value.clone(),
                    })
                })
                .collect();
            if rebased.is_empty() {
                None
            } else {
                Some(Delivery {
                    watcher_id: *id,
                    tx: entry.tx.clone(),
                    events: rebased,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;
    use serde_json::json;

    #[test]
    fn test_put_get_round_trip() {
        let store = Store::new();
        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        assert_eq!(store.get("/a").1, Some(Value::from_json(json!({"b": "1"}))));
        assert_eq!(
            store.get("/").1,
            Some(Value::from_json(json!({"a": {"b": "1"}})))
        );
        assert_eq!(store.get("/a/b").1, Some(Value::leaf("1")));
        assert_eq!(store.get("/nope").1, None);
    }

    #[test]
    fn test_version_strictly_increases() {
        let store = Store::new();
        let v0 = store.version();
        store.put("/a", &Value::leaf("1"), false).unwrap();
        let v1 = store.version();
        store.put("/a", &Value::leaf("1"), false).unwrap();
        let v2 = store.version();
        assert!(v1 > v0);
        assert!(v2 > v1);
        // Deleting nothing completes no mutation.
        store.delete("/nope", false).unwrap();
        assert_eq!(store.version(), v2);
    }

    #[test]
    fn test_get_returns_deep_copy() {
        let store = Store::new();
        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        let (_, snapshot) = store.get("/a");
        if let Some(Value::Dir(mut dir)) = snapshot {
            dir.insert("b".to_string(), Value::leaf("tampered"));
        }
        assert_eq!(store.get("/a/b").1, Some(Value::leaf("1")));
    }

    #[tokio::test]
    async fn test_watch_receives_subtree_events_in_order() {
        let store = Store::new();
        let mut watcher = store.watch("/a", 16).unwrap();
        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        store.put("/a/c", &Value::leaf("2"), false).unwrap();
        store.put("/other", &Value::leaf("x"), false).unwrap();

        assert_eq!(watcher.recv().await, Some(Event::update("/b", "1")));
        assert_eq!(watcher.recv().await, Some(Event::update("/c", "2")));

        store.delete("/a/b", false).unwrap();
        assert_eq!(watcher.recv().await, Some(Event::delete("/b")));
    }

    #[tokio::test]
    async fn test_watch_on_leaf_rebases_to_root() {
        let store = Store::new();
        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        let mut watcher = store.watch("/a/b", 16).unwrap();
        store.put("/a/b", &Value::leaf("9"), false).unwrap();
        let event = watcher.recv().await.unwrap();
        assert_eq!(event.path, "/");
        assert_eq!(event.action, Action::Update);
        assert_eq!(event.value, "9");
    }

    #[tokio::test]
    async fn test_no_back_replay() {
        let store = Store::new();
        store.put("/a/b", &Value::leaf("old"), false).unwrap();
        let mut watcher = store.watch("/a", 16).unwrap();
        store.put("/a/c", &Value::leaf("new"), false).unwrap();
        assert_eq!(watcher.recv().await, Some(Event::update("/c", "new")));
    }

    #[tokio::test]
    async fn test_slow_watcher_is_closed_others_unaffected() {
        let store = Store::new();
        let mut slow = store.watch("/a", 1).unwrap();
        let mut healthy = store.watch("/a", 16).unwrap();

        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        // Overflows the slow watcher's single-slot buffer.
        store.put("/a/c", &Value::leaf("2"), false).unwrap();

        assert_eq!(store.watcher_count(), 1);
        assert_eq!(slow.recv().await, Some(Event::update("/b", "1")));
        assert_eq!(slow.recv().await, None);

        assert_eq!(healthy.recv().await, Some(Event::update("/b", "1")));
        assert_eq!(healthy.recv().await, Some(Event::update("/c", "2")));
        store.put("/a/d", &Value::leaf("3"), false).unwrap();
        assert_eq!(healthy.recv().await, Some(Event::update("/d", "3")));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_drop_deregisters() {
        let store = Store::new();
        let watcher = store.watch("/a", 4).unwrap();
        assert_eq!(store.watcher_count(), 1);
        watcher.remove();
        watcher.remove();
        assert_eq!(store.watcher_count(), 0);

        let other = store.watch("/b", 4).unwrap();
        assert_eq!(store.watcher_count(), 1);
        drop(other);
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_closes_watchers_and_store() {
        let store = Store::new();
        let mut watcher = store.watch("/", 4).unwrap();
        store.put("/a", &Value::leaf("1"), false).unwrap();
        store.destroy();

        // Buffered events drain, then the channel reports closed.
        assert_eq!(watcher.recv().await, Some(Event::update("/a", "1")));
        assert_eq!(watcher.recv().await, None);

        assert!(matches!(
            store.put("/a", &Value::leaf("2"), false),
            Err(Error::StoreClosed)
        ));
        assert!(matches!(
            store.delete("/a", false),
            Err(Error::StoreClosed)
        ));
        assert!(matches!(store.watch("/", 4), Err(Error::StoreClosed)));
        assert_eq!(store.get("/").1, None);
    }

    #[test]
    fn test_walk_skips_other_subtrees() {
        let store = Store::new();
        store
            .put("/", &Value::from_json(json!({"a": {"b": "1"}, "c": "2"})), false)
            .unwrap();
        let mut seen = Vec::new();
        store.walk("/a", |p, v| seen.push(format!("{}={}", p, v)));
        assert_eq!(seen, vec!["/a/b=1"]);
    }
}
