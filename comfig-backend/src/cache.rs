//! Freshness-gated, process-local copy of the published server list.
//!
//! Reads inside the freshness window never touch the backing store. Stale
//! reads refetch. Concurrent stale readers may each refetch (no single-flight).

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use comfig_db::{KeyValueStore, KvMetadata};
use tracing::{debug, info, warn};

use crate::ranking::QuickplayError;
use crate::servers::{ServerListSnapshot, ServerRecord};

/// Store key of the published server list.
pub const SERVERS_KEY: &str = "servers";

/// What the cache currently holds. Replaced atomically as a whole.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    pub snapshot: Option<Arc<ServerListSnapshot>>,
    /// Unix ms before which `snapshot` may be served without a store read.
    pub expires_at: i64,
}

/// Whether `current` holds a snapshot that outlives a freshly `fetched` one.
fn supersedes(current: &CacheState, fetched: &CacheState) -> bool {
    current.snapshot.is_some() && current.expires_at > fetched.expires_at
}

pub struct ServerListCache<S> {
    store: S,
    state: ArcSwap<CacheState>,
    /// Lower bound on how long a fetched snapshot is served.
    min_freshness: Duration,
    /// Upper bound on a single store read.
    store_timeout: Duration,
}

impl<S: KeyValueStore> ServerListCache<S> {
    pub fn new(store: S, min_freshness: Duration, store_timeout: Duration) -> Self {
        Self {
            store,
            state: ArcSwap::from_pointee(CacheState::default()),
            min_freshness,
            store_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current snapshot, refetched from the store once the window has passed.
    pub async fn get(&self, now: i64) -> Result<Arc<CacheState>, QuickplayError> {
        let current = self.state.load_full();
        if now < current.expires_at && current.snapshot.is_some() {
            return Ok(current);
        }

        let fetched = tokio::time::timeout(
            self.store_timeout,
            self.store.get_with_metadata(SERVERS_KEY),
        )
        .await
        .map_err(|_| QuickplayError::StoreTimeout)??;

        let min_expiry = now + self.min_freshness.as_millis() as i64;
        let state = match fetched {
            Some(entry) => {
                let servers: Vec<ServerRecord> = serde_json::from_str(&entry.value)?;
                let valid_until = entry.metadata.until.unwrap_or(0);
                debug!(servers = servers.len(), valid_until, "refreshed server list");
                CacheState {
                    snapshot: Some(Arc::new(ServerListSnapshot {
                        servers,
                        valid_until,
                    })),
                    expires_at: valid_until.max(min_expiry),
                }
            }
            None => {
                warn!("no server list has been published");
                CacheState {
                    snapshot: None,
                    expires_at: min_expiry,
                }
            }
        };

        // A put may have landed while the store was being read. Its state
        // promises a later expiry and must not be replaced by this older read.
        let fetched = Arc::new(state);
        let previous = self.state.rcu(|current| {
            if supersedes(current, &fetched) {
                current.clone()
            } else {
                fetched.clone()
            }
        });

        if supersedes(&previous, &fetched) {
            debug!("kept newer server list installed during refetch");
            Ok(previous)
        } else {
            Ok(fetched)
        }
    }

    /// Persist a new server list and serve it from this process immediately.
    /// The expiry only ever moves forward.
    pub async fn put(
        &self,
        servers: Vec<ServerRecord>,
        valid_until: i64,
        now: i64,
    ) -> Result<(), QuickplayError> {
        let value = serde_json::to_string(&servers)?;
        self.store
            .put_with_metadata(
                SERVERS_KEY,
                value,
                KvMetadata {
                    until: Some(valid_until),
                },
            )
            .await?;

        let snapshot = Arc::new(ServerListSnapshot {
            servers,
            valid_until,
        });
        let previous = self.state.rcu(|current| CacheState {
            snapshot: Some(snapshot.clone()),
            expires_at: current.expires_at.max(valid_until),
        });

        info!(
            servers = snapshot.servers.len(),
            valid_for_ms = valid_until.max(previous.expires_at) - now,
            "published server list"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::servers::fixtures::server;
    use comfig_db::{Result as DbResult, StoredValue};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60_000;

    /// In-memory store counting reads.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        entries: Mutex<HashMap<String, StoredValue>>,
        pub(crate) reads: AtomicUsize,
    }

    impl MemoryStore {
        pub(crate) fn with_servers(servers: &[ServerRecord], until: Option<i64>) -> Self {
            let store = Self::default();
            store.entries.lock().unwrap().insert(
                SERVERS_KEY.to_string(),
                StoredValue {
                    value: serde_json::to_string(servers).unwrap(),
                    metadata: KvMetadata { until },
                },
            );
            store
        }

        pub(crate) fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl KeyValueStore for MemoryStore {
        async fn get_with_metadata(&self, key: &str) -> DbResult<Option<StoredValue>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn put_with_metadata(
            &self,
            key: &str,
            value: String,
            metadata: KvMetadata,
        ) -> DbResult<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), StoredValue { value, metadata });
            Ok(())
        }
    }

    /// Store whose reads take a snapshot of the data, then wait for a permit
    /// before answering.
    struct GatedStore {
        inner: MemoryStore,
        gate: tokio::sync::Semaphore,
    }

    impl KeyValueStore for GatedStore {
        async fn get_with_metadata(&self, key: &str) -> DbResult<Option<StoredValue>> {
            let value = self.inner.get_with_metadata(key).await?;
            self.gate.acquire().await.unwrap().forget();
            Ok(value)
        }

        async fn put_with_metadata(
            &self,
            key: &str,
            value: String,
            metadata: KvMetadata,
        ) -> DbResult<()> {
            self.inner.put_with_metadata(key, value, metadata).await
        }
    }

    fn cache(store: MemoryStore) -> ServerListCache<MemoryStore> {
        ServerListCache::new(store, Duration::from_secs(60), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_second_get_within_window_uses_memory() {
        let cache = cache(MemoryStore::with_servers(
            &[server("a", 0.0, 0.0, 10.0)],
            None,
        ));

        let first = cache.get(NOW).await.unwrap();
        let second = cache.get(NOW + MINUTE - 1).await.unwrap();

        assert_eq!(cache.store().reads(), 1);
        assert_eq!(first.snapshot, second.snapshot);
        assert_eq!(first.expires_at, NOW + MINUTE);
    }

    #[tokio::test]
    async fn test_refetch_after_window() {
        let cache = cache(MemoryStore::with_servers(
            &[server("a", 0.0, 0.0, 10.0)],
            None,
        ));

        cache.get(NOW).await.unwrap();
        cache.get(NOW + MINUTE).await.unwrap();
        assert_eq!(cache.store().reads(), 2);
    }

    #[tokio::test]
    async fn test_publisher_until_extends_window() {
        let until = NOW + 10 * MINUTE;
        let cache = cache(MemoryStore::with_servers(
            &[server("a", 0.0, 0.0, 10.0)],
            Some(until),
        ));

        let state = cache.get(NOW).await.unwrap();
        assert_eq!(state.expires_at, until);
        assert_eq!(state.snapshot.as_ref().unwrap().valid_until, until);

        cache.get(until - 1).await.unwrap();
        assert_eq!(cache.store().reads(), 1);
    }

    #[tokio::test]
    async fn test_put_then_get_skips_store() {
        let cache = cache(MemoryStore::default());
        let servers = vec![server("a", 0.0, 0.0, 10.0), server("b", 1.0, 1.0, 20.0)];
        let until = NOW + 5 * MINUTE;

        cache.put(servers.clone(), until, NOW).await.unwrap();
        let state = cache.get(until - 1).await.unwrap();

        assert_eq!(cache.store().reads(), 0);
        assert_eq!(state.snapshot.as_ref().unwrap().servers, servers);
    }

    #[tokio::test]
    async fn test_put_never_lowers_expiry() {
        let cache = cache(MemoryStore::with_servers(&[], Some(NOW + 10 * MINUTE)));
        cache.get(NOW).await.unwrap();

        // An earlier horizon keeps the promised window
        let servers = vec![server("b", 1.0, 1.0, 20.0)];
        cache.put(servers.clone(), NOW + MINUTE, NOW).await.unwrap();

        let state = cache.get(NOW + 5 * MINUTE).await.unwrap();
        assert_eq!(state.expires_at, NOW + 10 * MINUTE);
        assert_eq!(state.snapshot.as_ref().unwrap().servers, servers);
        assert_eq!(cache.store().reads(), 1);
    }

    #[tokio::test]
    async fn test_refetch_keeps_put_that_landed_during_read() {
        let store = GatedStore {
            inner: MemoryStore::with_servers(&[server("old", 0.0, 0.0, 10.0)], None),
            gate: tokio::sync::Semaphore::new(0),
        };
        let cache = Arc::new(ServerListCache::new(
            store,
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));

        // A stale get reads the old list and stalls before installing it
        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(NOW).await.map(|state| state.expires_at) })
        };
        while cache.store().inner.reads() == 0 {
            tokio::task::yield_now().await;
        }

        let until = NOW + 10 * MINUTE;
        cache
            .put(vec![server("new", 1.0, 1.0, 10.0)], until, NOW)
            .await
            .unwrap();
        cache.store().gate.add_permits(1);

        // The reader gets the newer state, not its own older read
        assert_eq!(reader.await.unwrap().unwrap(), until);

        let state = cache.get(NOW + 1).await.unwrap();
        assert_eq!(state.expires_at, until);
        assert_eq!(state.snapshot.as_ref().unwrap().servers[0].info.addr, "new");
        assert_eq!(cache.store().inner.reads(), 1);
    }

    #[tokio::test]
    async fn test_put_persists_to_store() {
        let cache = cache(MemoryStore::default());
        let servers = vec![server("a", 0.0, 0.0, 10.0)];
        cache.put(servers.clone(), NOW, NOW).await.unwrap();

        // A second process sharing the store sees the publish
        let entry = cache
            .store()
            .get_with_metadata(SERVERS_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.metadata.until, Some(NOW));
        let stored: Vec<ServerRecord> = serde_json::from_str(&entry.value).unwrap();
        assert_eq!(stored, servers);
    }

    #[tokio::test]
    async fn test_missing_list_is_empty_not_error() {
        let cache = cache(MemoryStore::default());

        let state = cache.get(NOW).await.unwrap();
        assert!(state.snapshot.is_none());
        assert_eq!(cache.store().reads(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_list_is_reported() {
        let store = MemoryStore::default();
        store.entries.lock().unwrap().insert(
            SERVERS_KEY.to_string(),
            StoredValue {
                value: "{not json".to_string(),
                metadata: KvMetadata::default(),
            },
        );
        let cache = cache(store);

        assert!(matches!(
            cache.get(NOW).await,
            Err(QuickplayError::CorruptSnapshot(_))
        ));
    }
}
