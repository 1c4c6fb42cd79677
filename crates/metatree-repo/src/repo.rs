//! Repository facade over the data and mapping trees
//!
//! The repository owns two independent stores: the data tree (authoritative
//! metadata) and the mapping tree, whose first level is keyed by client IP
//! and whose leaves are path strings pointing into the data tree. Reads
//! come straight from the stores; writes go through the backend and are
//! reflected back by its sync loops. The projection engine resolves a
//! client's mapping into the composite "self" view, and watches are
//! coalesced into a single structured response.

use crate::backend::Backend;
use crate::coalesce::{self, Fused};
use metatree_common::{path, Config, Error, Result, Value};
use metatree_store::{AggregateWatcher, Store, TimerPool};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The public metadata service surface over the two trees.
pub struct MetadataRepo {
    only_self: AtomicBool,
    data: Store,
    mapping: Store,
    backend: Arc<dyn Backend>,
    data_stop: CancellationToken,
    mapping_stop: CancellationToken,
    timers: TimerPool,
    config: Config,
}

impl MetadataRepo {
    /// Create a repository with empty trees; call [`start_sync`] to let the
    /// backend populate them.
    ///
    /// [`start_sync`]: MetadataRepo::start_sync
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        Self {
            only_self: AtomicBool::new(config.only_self),
            data: Store::new(),
            mapping: Store::new(),
            backend,
            data_stop: CancellationToken::new(),
            mapping_stop: CancellationToken::new(),
            timers: TimerPool::new(config.watch.debounce(), config.watch.timer_pool_idle),
            config,
        }
    }

    /// Toggle only-self mode at runtime. When on, the data tree is hidden
    /// and clients see nothing but their projected self view.
    pub fn set_only_self(&self, only_self: bool) {
        self.only_self.store(only_self, Ordering::Relaxed);
    }

    fn only_self(&self) -> bool {
        self.only_self.load(Ordering::Relaxed)
    }

    fn buf_len(&self) -> usize {
        self.config.watch.buf_len
    }

    /// Spawn both backend sync loops.
    pub fn start_sync(&self) {
        info!("start sync");
        let backend = Arc::clone(&self.backend);
        let store = self.data.clone();
        let stop = self.data_stop.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.sync(store, stop).await {
                warn!("data sync loop ended with error: {}", err);
            }
        });
        let backend = Arc::clone(&self.backend);
        let store = self.mapping.clone();
        let stop = self.mapping_stop.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.sync_mapping(store, stop).await {
                warn!("mapping sync loop ended with error: {}", err);
            }
        });
    }

    /// Signal both sync loops to stop, wait out the grace period, then
    /// destroy the stores, waking every outstanding watcher.
    pub async fn stop_sync(&self) {
        info!("stop sync");
        self.data_stop.cancel();
        self.mapping_stop.cancel();
        tokio::time::sleep(self.config.sync.shutdown_grace()).await;
        self.data.destroy();
        self.mapping.destroy();
    }

    /// The tree visible to `client_ip` at `node_path`, with the current
    /// data version.
    ///
    /// At the root the client's projected view is merged in under the
    /// synthetic `"self"` key. In only-self mode the data tree is hidden:
    /// the root returns only `{"self": ...}` and any other path returns
    /// nothing.
    pub fn root(&self, client_ip: &str, node_path: &str) -> (u64, Option<Value>) {
        let npath = path::normalize(node_path);
        if self.only_self() {
            let version = self.data.version();
            if npath != "/" {
                return (version, None);
            }
            let mut composite = BTreeMap::new();
            if let Some(view) = self.self_view(client_ip, "/") {
                composite.insert("self".to_string(), view);
            }
            return (version, Some(Value::Dir(composite)));
        }

        let (version, mut value) = self.data.get(&npath);
        if npath == "/" {
            if let Some(Value::Dir(entries)) = value.as_mut() {
                if let Some(view) = self.self_view(client_ip, "/") {
                    entries.insert("self".to_string(), view);
                }
            }
        }
        (version, value)
    }

    /// The projection for `client_ip` at `node_path`: the client's mapping
    /// entry with every path leaf replaced by the data it points at.
    ///
    /// `client_ip` must be provided by the caller; an empty value is a
    /// programming error in the serving layer.
    pub fn self_view(&self, client_ip: &str, node_path: &str) -> Option<Value> {
        assert!(!client_ip.is_empty(), "client_ip must not be empty");
        let npath = path::normalize(node_path);
        let (_, mapping_value) = self.mapping.get(&path::join("/", client_ip));
        let Some(mapping_value) = mapping_value else {
            debug!("no mapping for {}", client_ip);
            return None;
        };
        match mapping_value {
            Value::Dir(entries) => self.project(&npath, &entries),
            // The IP maps straight to a single data path.
            Value::Leaf(link) => self.resolve_link(&npath, &link),
        }
    }

    /// Walk `node_path` through a mapping directory, descending into
    /// submappings and following path leaves into the data tree.
    fn project(&self, node_path: &str, mapping: &BTreeMap<String, Value>) -> Option<Value> {
        let segs = path::segments(node_path);
        let Some((first, rest)) = segs.split_first() else {
            // At the mapping itself: resolve every entry into a composite.
            let mut composite = BTreeMap::new();
            for (name, entry) in mapping {
                let resolved = match entry {
                    Value::Dir(sub) => self.project("/", sub),
                    Value::Leaf(link) => self.resolve_link("/", link),
                };
                match resolved {
                    Some(value) => {
                        composite.insert(name.clone(), value);
                    }
                    None => warn!("mapping entry {} resolves to nothing", name),
                }
            }
            return Some(Value::Dir(composite));
        };

        let remainder = if rest.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", rest.join("/"))
        };
        match mapping.get(*first) {
            Some(Value::Dir(sub)) => self.project(&remainder, sub),
            Some(Value::Leaf(link)) => self.resolve_link(&remainder, link),
            None => {
                debug!("no mapping entry for {}", node_path);
                None
            }
        }
    }

    fn resolve_link(&self, node_path: &str, link: &str) -> Option<Value> {
        self.data.get(&path::join(link, node_path)).1
    }

    /// Watch `node_path` and return one coalesced result: a single
    /// `"<action>|<value>"` string for a leaf, or a tree of them for a
    /// subtree. Returns nothing when only-self mode hides the path.
    pub async fn watch(
        &self,
        stop: &CancellationToken,
        client_ip: &str,
        node_path: &str,
    ) -> Option<Value> {
        let npath = path::normalize(node_path);
        if self.only_self() {
            if npath == "/" {
                return self.watch_self(stop, client_ip, "/").await;
            }
            return None;
        }
        let mut watcher = self.data.watch(&npath, self.buf_len()).ok()?;
        Some(coalesce::collect(&mut watcher, stop, &self.timers).await)
    }

    /// Watch the data behind the client's mapping at `node_path`.
    ///
    /// A watcher on the mapping entry itself guards the composite: the
    /// first mapping change ends the watch with whatever was accumulated,
    /// and the client is expected to re-establish it against the new
    /// mapping. Leaf mappings watch one data subtree; directory mappings
    /// watch one subtree per flattened entry through an aggregate.
    pub async fn watch_self(
        &self,
        stop: &CancellationToken,
        client_ip: &str,
        node_path: &str,
    ) -> Option<Value> {
        assert!(!client_ip.is_empty(), "client_ip must not be empty");
        let npath = path::join(&path::join("/", client_ip), node_path);
        debug!("watch self {}", npath);

        let (_, mapping_value) = self.mapping.get(&npath);
        let mapping_value = mapping_value?;
        let mut mapping_watcher = self.mapping.watch(&npath, self.buf_len()).ok()?;

        let trip = CancellationToken::new();
        // Ends the guard task (and drops the mapping watcher) when this
        // call returns without the mapping having changed.
        let _trip_guard = trip.clone().drop_guard();
        {
            let trip = trip.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    event = mapping_watcher.recv() => {
                        // Mapping changed; first change wins. A closed
                        // channel just ends the guard.
                        if event.is_some() {
                            trip.cancel();
                        }
                    }
                    _ = trip.cancelled() => {}
                    _ = stop.cancelled() => {}
                }
            });
        }

        match &mapping_value {
            Value::Leaf(link) => {
                let watcher = self.data.watch(link, self.buf_len()).ok()?;
                let mut source = Fused::new(watcher, trip.clone());
                Some(coalesce::collect(&mut source, stop, &self.timers).await)
            }
            Value::Dir(_) => {
                let mut members = BTreeMap::new();
                for (virtual_path, link) in mapping_value.flatten() {
                    let watcher = self.data.watch(&link, self.buf_len()).ok()?;
                    members.insert(virtual_path, watcher);
                }
                let aggregate = AggregateWatcher::new(members, self.buf_len());
                let mut source = Fused::new(aggregate, trip.clone());
                Some(coalesce::collect(&mut source, stop, &self.timers).await)
            }
        }
    }

    /// The data value at `node_path`, or nothing.
    pub fn get_data(&self, node_path: &str) -> Option<Value> {
        self.data.get(&path::normalize(node_path)).1
    }

    /// Write a data value through the backend.
    pub async fn put_data(&self, node_path: &str, value: Value, replace: bool) -> Result<()> {
        self.backend
            .put(&path::normalize(node_path), value, replace)
            .await
    }

    /// Delete data through the backend.
    ///
    /// With `subs`, each named child of `node_path` is deleted; names must
    /// not contain `/`, empty names are skipped, and absent children are
    /// no-ops. Without `subs` the node itself is deleted. The current value
    /// decides whether the backend delete is a subtree or a leaf delete.
    pub async fn delete_data(&self, node_path: &str, subs: &[&str]) -> Result<()> {
        check_subs(subs)?;
        let npath = path::normalize(node_path);
        if subs.is_empty() {
            if let (_, Some(value)) = self.data.get(&npath) {
                return self.backend.delete(&npath, value.is_dir()).await;
            }
            return Ok(());
        }
        for sub in subs {
            let sub = sub.trim();
            if sub.is_empty() {
                continue;
            }
            let sub_path = path::join(&npath, sub);
            if let (_, Some(value)) = self.data.get(&sub_path) {
                self.backend.delete(&sub_path, value.is_dir()).await?;
            }
        }
        Ok(())
    }

    /// The mapping value at `node_path`, or nothing.
    pub fn get_mapping(&self, node_path: &str) -> Option<Value> {
        self.mapping.get(&path::normalize(node_path)).1
    }

    /// Validate and write a mapping value through the backend.
    ///
    /// A write at the root must be a directory keyed by IP literals; every
    /// mapping leaf must be a `/`-prefixed data path and no key may contain
    /// `/`.
    pub async fn put_mapping(&self, node_path: &str, value: Value, replace: bool) -> Result<()> {
        let npath = path::normalize(node_path);
        if npath == "/" {
            let Value::Dir(entries) = &value else {
                warn!("mapping root write is not a directory");
                return Err(Error::invalid_mapping("mapping root must be a directory"));
            };
            for (key, entry) in entries {
                parse_ip(key)?;
                check_mapping_entry(entry)?;
            }
        } else {
            let segs = path::segments(&npath);
            parse_ip(segs[0])?;
            check_mapping_entry(&value)?;
        }
        self.backend.put_mapping(&npath, value, replace).await
    }

    /// Delete mapping entries through the backend; same sub-name rules as
    /// [`delete_data`](MetadataRepo::delete_data).
    pub async fn delete_mapping(&self, node_path: &str, subs: &[&str]) -> Result<()> {
        check_subs(subs)?;
        let npath = path::normalize(node_path);
        if subs.is_empty() {
            if let (_, Some(value)) = self.mapping.get(&npath) {
                return self.backend.delete_mapping(&npath, value.is_dir()).await;
            }
            return Ok(());
        }
        for sub in subs {
            let sub = sub.trim();
            if sub.is_empty() {
                continue;
            }
            let sub_path = path::join(&npath, sub);
            if let (_, Some(value)) = self.mapping.get(&sub_path) {
                self.backend.delete_mapping(&sub_path, value.is_dir()).await?;
            }
        }
        Ok(())
    }

    /// The number of completed mutations on the data tree
    pub fn data_version(&self) -> u64 {
        self.data.version()
    }
}

fn parse_ip(key: &str) -> Result<IpAddr> {
    key.parse::<IpAddr>().map_err(|_| {
        Error::invalid_mapping(format!("first-level key {:?} is not an ip literal", key))
    })
}

/// A mapping entry is a directory of further entries or a path leaf.
fn check_mapping_entry(value: &Value) -> Result<()> {
    match value {
        Value::Dir(_) => check_mapping(value),
        Value::Leaf(_) => check_mapping_path(value),
    }
}

fn check_mapping(value: &Value) -> Result<()> {
    let Value::Dir(entries) = value else {
        return Err(Error::invalid_mapping("mapping node must be a directory"));
    };
    for (key, entry) in entries {
        if key.contains('/') {
            return Err(Error::invalid_mapping(format!(
                "mapping key {:?} must not contain '/'",
                key
            )));
        }
        check_mapping_entry(entry)?;
    }
    Ok(())
}

fn check_mapping_path(value: &Value) -> Result<()> {
    match value {
        Value::Leaf(link) if link.starts_with('/') => Ok(()),
        _ => Err(Error::invalid_mapping(
            "mapping value must be an absolute data path",
        )),
    }
}

fn check_subs(subs: &[&str]) -> Result<()> {
    for sub in subs {
        if sub.contains('/') {
            return Err(Error::invalid_path(format!(
                "sub node {:?} must not be a path",
                sub
            )));
        }
    }
    Ok(())
}
