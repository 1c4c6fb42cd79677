//! Aggregate watcher fan-in
//!
//! Multiplexes several watchers into one event stream for composite views.
//! Each member is named by the virtual path it backs; its events are
//! re-tagged by joining that name onto the event path, so consumers can
//! reassemble the composite from a single stream.

use crate::event::Event;
use crate::watch::{EventSource, Watcher};
use async_trait::async_trait;
use metatree_common::path;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A watcher formed by fanning in several member watchers.
///
/// The stream stays open while any member is open and closes once every
/// member has closed. Dropping the aggregate cancels the forwarders, which
/// drop (and thereby deregister) their members.
pub struct AggregateWatcher {
    rx: mpsc::Receiver<Event>,
    cancel: CancellationToken,
}

impl AggregateWatcher {
    /// Fan `members` into one stream with an output buffer of `buf` events.
    pub fn new(members: BTreeMap<String, Watcher>, buf: usize) -> Self {
        let (tx, rx) = mpsc::channel(buf.max(1));
        let cancel = CancellationToken::new();
        for (name, mut member) in members {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = member.recv() => match event {
                            Some(event) => {
                                let tagged = Event {
                                    path: path::join(&name, &event.path),
                                    ..event
                                };
                                if tx.send(tagged).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                        _ = cancel.cancelled() => break,
                    }
                }
                // The member watcher drops here and deregisters itself.
            });
        }
        // The output closes once the last forwarder exits.
        drop(tx);
        Self { rx, cancel }
    }

    /// Receive the next re-tagged event; `None` once all members closed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Cancel all forwarders, removing every member. Also runs on drop.
    pub fn remove(&self) {
        self.cancel.cancel();
    }
}

impl Drop for AggregateWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl EventSource for AggregateWatcher {
    async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
