//! Result coalescing for watch streams
//!
//! Turns a burst of watcher events into a single response. A watcher bound
//! directly to a leaf sees its events at `"/"`, so the first such event
//! short-circuits into a single `"<action>|<value>"` string. Anything else
//! accumulates into a path→rendered-event batch under a rolling debounce:
//! every incoming event re-arms the timer, and the batch is returned once
//! the stream has been quiet for the full window.

use metatree_common::Value;
use metatree_store::timer::PooledTimer;
use metatree_store::{Event, EventSource, TimerPool};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Render an event in the wire format carried by coalesced results.
fn render(event: &Event) -> String {
    format!("{}|{}", event.action, event.value)
}

/// Consume `source` until the debounce window closes, the source closes,
/// or `stop` fires.
///
/// Returns a leaf for the fast-path, the accumulated batch (expanded back
/// into a nested directory) when the stream ends or goes quiet, and an
/// empty directory when the caller cancels — a cancelled watch discards
/// its batch.
pub(crate) async fn collect<S: EventSource>(
    source: &mut S,
    stop: &CancellationToken,
    timers: &TimerPool,
) -> Value {
    let mut batch: BTreeMap<String, String> = BTreeMap::new();
    let mut timer: Option<PooledTimer> = None;

    loop {
        let armed = timer.is_some();
        tokio::select! {
            event = source.recv() => match event {
                Some(event) => {
                    let rendered = render(&event);
                    if event.path == "/" {
                        if let Some(t) = timer.take() {
                            timers.release(t);
                        }
                        return Value::Leaf(rendered);
                    }
                    // Later events for the same path overwrite earlier ones.
                    batch.insert(event.path, rendered);
                    if let Some(t) = timer.take() {
                        timers.release(t);
                    }
                    timer = Some(timers.acquire());
                }
                None => break,
            },
            _ = async {
                if let Some(t) = timer.as_mut() {
                    t.as_mut().await;
                }
            }, if armed => {
                break;
            }
            _ = stop.cancelled() => {
                batch.clear();
                break;
            }
        }
    }

    if let Some(t) = timer.take() {
        timers.release(t);
    }
    Value::expand(&batch)
}

/// An event source that ends once `trip` fires.
///
/// Used to tie a composite watch to the mapping entry that defines it: the
/// first mapping change trips the fuse and the stream reports closed, so
/// the consumer gets whatever it accumulated and can re-establish the
/// watch against the new mapping.
pub(crate) struct Fused<S> {
    inner: S,
    trip: CancellationToken,
    tripped: bool,
}

impl<S: EventSource> Fused<S> {
    pub(crate) fn new(inner: S, trip: CancellationToken) -> Self {
        Self {
            inner,
            trip,
            tripped: false,
        }
    }
}

#[async_trait::async_trait]
impl<S: EventSource> EventSource for Fused<S> {
    async fn recv(&mut self) -> Option<Event> {
        if self.tripped {
            return None;
        }
        tokio::select! {
            event = self.inner.recv() => event,
            _ = self.trip.cancelled() => {
                self.tripped = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metatree_store::Store;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn pool() -> Arc<TimerPool> {
        Arc::new(TimerPool::new(Duration::from_millis(100), 8))
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaf_fast_path_returns_single_string() {
        let store = Store::new();
        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        let mut watcher = store.watch("/a/b", 16).unwrap();
        let stop = CancellationToken::new();
        let timers = pool();

        let handle = tokio::spawn({
            let timers = timers.clone();
            let stop = stop.clone();
            async move { collect(&mut watcher, &stop, &timers).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.put("/a/b", &Value::leaf("9"), false).unwrap();

        assert_eq!(handle.await.unwrap(), Value::leaf("update|9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_batch() {
        let store = Store::new();
        let mut watcher = store.watch("/a", 16).unwrap();
        let stop = CancellationToken::new();
        let timers = pool();

        let handle = tokio::spawn({
            let timers = timers.clone();
            let stop = stop.clone();
            async move { collect(&mut watcher, &stop, &timers).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.put("/a/c", &Value::leaf("2"), false).unwrap();

        let result = handle.await.unwrap();
        assert_eq!(
            result,
            Value::from_json(json!({"b": "update|1", "c": "update|2"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_event_for_same_path_wins() {
        let store = Store::new();
        let mut watcher = store.watch("/a", 16).unwrap();
        let stop = CancellationToken::new();
        let timers = pool();

        let handle = tokio::spawn({
            let timers = timers.clone();
            let stop = stop.clone();
            async move { collect(&mut watcher, &stop, &timers).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        store.put("/a/b", &Value::leaf("2"), false).unwrap();

        assert_eq!(
            handle.await.unwrap(),
            Value::from_json(json!({"b": "update|2"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_discards_batch() {
        let store = Store::new();
        let mut watcher = store.watch("/a", 16).unwrap();
        let stop = CancellationToken::new();
        let timers = pool();

        let handle = tokio::spawn({
            let timers = timers.clone();
            let stop = stop.clone();
            async move { collect(&mut watcher, &stop, &timers).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        stop.cancel();

        assert_eq!(handle.await.unwrap(), Value::dir());
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_close_returns_accumulated_batch() {
        let store = Store::new();
        let mut watcher = store.watch("/a", 16).unwrap();
        let stop = CancellationToken::new();
        let timers = pool();

        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        store.destroy();

        let result = collect(&mut watcher, &stop, &timers).await;
        assert_eq!(result, Value::from_json(json!({"b": "update|1"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fuse_trip_ends_stream_with_batch() {
        let store = Store::new();
        let watcher = store.watch("/a", 16).unwrap();
        let stop = CancellationToken::new();
        let trip = CancellationToken::new();
        let timers = pool();
        let mut fused = Fused::new(watcher, trip.clone());

        let handle = tokio::spawn({
            let timers = timers.clone();
            let stop = stop.clone();
            async move { collect(&mut fused, &stop, &timers).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.put("/a/b", &Value::leaf("1"), false).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        trip.cancel();

        assert_eq!(
            handle.await.unwrap(),
            Value::from_json(json!({"b": "update|1"}))
        );
    }
}
