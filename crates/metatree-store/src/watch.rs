//! Subtree watchers
//!
//! A watcher is a live subscription to changes under one subtree,
//! delivering events over a bounded channel. Watchers deregister themselves
//! when dropped, so consumers that bail out never leave registrations
//! behind.

use crate::event::Event;
use crate::store::StoreCore;
use async_trait::async_trait;
use std::sync::Weak;
use tokio::sync::mpsc;

/// An asynchronous stream of change events.
///
/// Implemented by [`Watcher`] and [`crate::AggregateWatcher`] so consumers
/// such as a result coalescer can handle either uniformly.
#[async_trait]
pub trait EventSource: Send {
    /// The next event, or `None` once the source is closed.
    async fn recv(&mut self) -> Option<Event>;
}

/// A live subscription to changes under one subtree.
///
/// Events arrive with paths rewritten relative to the watched root. The
/// subscription ends when it is removed, when the store is destroyed, or
/// when this watcher falls too far behind and the store closes it; in every
/// case `recv` drains buffered events and then returns `None`.
pub struct Watcher {
    pub(crate) id: u64,
    pub(crate) path: String,
    pub(crate) rx: mpsc::Receiver<Event>,
    pub(crate) core: Weak<StoreCore>,
}

impl Watcher {
    /// The normalized root this watcher is bound to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Receive the next event; `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Deregister from the store. Idempotent; also runs on drop.
    pub fn remove(&self) {
        if let Some(core) = self.core.upgrade() {
            core.remove_watcher(self.id);
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.remove();
    }
}

#[async_trait]
impl EventSource for Watcher {
    async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
