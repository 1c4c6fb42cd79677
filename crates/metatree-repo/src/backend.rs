//! Backend contract
//!
//! The repository is a read-optimized cache over an external key-value
//! source. Writes go through the backend and are reflected back by its
//! long-running sync loops; the repository never mutates its own stores on
//! the write path, so visibility of a write is eventual.

use async_trait::async_trait;
use metatree_common::{Result, Value};
use metatree_store::Store;
use tokio_util::sync::CancellationToken;

/// External source of both trees.
///
/// `sync`/`sync_mapping` run until their stop token fires, keeping the
/// given store in step with the source. The write operations mutate the
/// source only; errors from it surface as [`metatree_common::Error::Backend`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Populate and follow the data tree until `stop` fires.
    async fn sync(&self, store: Store, stop: CancellationToken) -> Result<()>;

    /// Populate and follow the mapping tree until `stop` fires.
    async fn sync_mapping(&self, store: Store, stop: CancellationToken) -> Result<()>;

    /// Write a data value to the source.
    async fn put(&self, path: &str, value: Value, replace: bool) -> Result<()>;

    /// Delete a data subtree (`dir=true`) or leaf from the source.
    async fn delete(&self, path: &str, dir: bool) -> Result<()>;

    /// Write a mapping value to the source.
    async fn put_mapping(&self, path: &str, value: Value, replace: bool) -> Result<()>;

    /// Delete a mapping subtree or leaf from the source.
    async fn delete_mapping(&self, path: &str, dir: bool) -> Result<()>;
}
