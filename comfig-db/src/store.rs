//! Backing key-value store abstraction.
//!
//! The quickplay server list lives behind this trait so the in-process cache
//! can be exercised against any store that honours `get`/`put` with metadata.

use std::future::Future;

use crate::{Database, KvMetadata, Result, StoredValue};

/// Durable key-value store with per-entry publisher metadata.
/// No multi-key transactions are assumed.
pub trait KeyValueStore: Send + Sync {
    /// Read a value and its metadata, `None` if the key is absent.
    fn get_with_metadata(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<StoredValue>>> + Send;

    /// Replace the value and metadata under `key`.
    fn put_with_metadata(
        &self,
        key: &str,
        value: String,
        metadata: KvMetadata,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl KeyValueStore for Database {
    async fn get_with_metadata(&self, key: &str) -> Result<Option<StoredValue>> {
        self.kv_get(key.to_string()).await
    }

    async fn put_with_metadata(&self, key: &str, value: String, metadata: KvMetadata) -> Result<()> {
        self.kv_put(key.to_string(), value, metadata).await
    }
}
