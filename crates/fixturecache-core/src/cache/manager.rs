use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::memory::{MemoryTier, Value};
use super::policy::{Durability, FetchPolicy};
use super::registry::{FetchOrigin, FetchRegistry, FetchTicket, SharedFetch};
use crate::error::{BoxError, CacheError, StorageError};
use crate::store::DurableStore;

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub durable_hits: u64,
    pub fetches_started: u64,
    pub fetches_joined: u64,
    pub background_refreshes: u64,
    pub durable_write_failures: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    fetches_started: AtomicU64,
    fetches_joined: AtomicU64,
    background_refreshes: AtomicU64,
    durable_write_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_joined: self.fetches_joined.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            durable_write_failures: self.durable_write_failures.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    memory: Mutex<MemoryTier>,
    registry: FetchRegistry,
    store: Arc<dyn DurableStore>,
    /// Fetch write-through persists under the read side; `remove` and
    /// `clear` take the write side, so a detached fetch never persists after
    /// the record it would replace is gone.
    durable_writes: RwLock<()>,
    counters: Counters,
}

/// The application's cache: memory tier, durable store and fetch
/// de-duplication behind one handle.
///
/// Clone is cheap and every clone shares the same state. Build one at
/// startup and pass it to whatever needs data.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn DurableStore>, memory_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                memory: Mutex::new(MemoryTier::new(memory_capacity)),
                registry: FetchRegistry::new(),
                store,
                durable_writes: RwLock::new(()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.inner.store
    }

    /// Memory-only lookup. Never fetches and never touches the durable store.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: Any + Clone + Send + Sync,
    {
        let Some(value) = self.inner.memory.lock().get(key) else {
            return Ok(None);
        };
        let value = downcast(key, value)?;
        Counters::bump(&self.inner.counters.memory_hits);
        Ok(Some(value))
    }

    /// Stale-while-revalidate read.
    ///
    /// A live memory entry is returned as is. Otherwise a durable record no
    /// older than `policy.max_durable_age` is returned immediately while the
    /// producer refreshes both tiers in the background. With nothing usable
    /// cached, the call waits on the producer, sharing its execution with any
    /// concurrent caller for the same key.
    pub async fn get_or_fetch<T, F, Fut, E>(
        &self,
        key: &str,
        policy: FetchPolicy,
        producer: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        if let Some(value) = self.get::<T>(key)? {
            debug!(key = %key, "Memory hit");
            return Ok(value);
        }

        match self.load_durable::<T>(key, policy.max_durable_age).await {
            Ok(value) => {
                debug!(key = %key, "Serving durable record, refreshing in background");
                Counters::bump(&self.inner.counters.durable_hits);
                self.inner
                    .memory
                    .lock()
                    .put(key, Arc::new(value.clone()), policy.ttl);
                self.refresh_in_background(key, policy.ttl, producer);
                return Ok(value);
            }
            Err(CacheError::NotFound) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Durable read failed, fetching instead");
            }
        }

        let value = self.start_fetch(key, policy.ttl, producer).await?;
        downcast(key, value)
    }

    /// Prime the cache with a value the caller already has.
    ///
    /// The memory tier is always written. With [`Durability::Durable`] the
    /// value is persisted too, and a failure to do so is returned.
    pub async fn set<T>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
        durability: Durability,
    ) -> Result<(), CacheError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let payload = match durability {
            Durability::Durable => {
                Some(serde_json::to_vec(&value).map_err(|e| StorageError::serialize(key, e)))
            }
            Durability::MemoryOnly => None,
        };
        self.inner.memory.lock().put(key, Arc::new(value), ttl);

        if let Some(payload) = payload {
            self.inner.store.persist(key, payload?).await?;
        }
        Ok(())
    }

    /// Forget `key` in both tiers. A fetch in progress for it is detached:
    /// its waiters still get their result, but it no longer populates the
    /// cache.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let _exclusive = self.inner.durable_writes.write().await;
        self.inner.registry.cancel(key);
        self.inner.memory.lock().remove(key);
        self.inner.store.remove(key).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        let _exclusive = self.inner.durable_writes.write().await;
        let detached = self.inner.registry.cancel_all();
        self.inner.memory.lock().clear();
        self.inner.store.clear().await?;
        debug!(detached, "Cache cleared");
        Ok(())
    }

    /// Drop expired memory entries ahead of capacity pressure.
    pub fn purge_expired(&self) -> usize {
        self.inner.memory.lock().purge_expired()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.registry.in_flight()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    async fn load_durable<T>(&self, key: &str, max_age: Duration) -> Result<T, CacheError>
    where
        T: DeserializeOwned,
    {
        let record = self
            .inner
            .store
            .load(key)
            .await?
            .ok_or(CacheError::NotFound)?;

        if record.is_older_than(max_age) {
            debug!(key = %key, age_secs = record.age().as_secs(), "Durable record too old");
            return Err(CacheError::NotFound);
        }

        serde_json::from_slice(&record.payload)
            .map_err(|e| StorageError::corrupt(key, e.to_string()).into())
    }

    fn start_fetch<T, F, Fut, E>(&self, key: &str, ttl: Duration, producer: F) -> SharedFetch
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let cache = self.clone();
        let (fetch, origin) = self.inner.registry.fetch(key, move |ticket| async move {
            let value = producer()
                .await
                .map_err(|e| CacheError::producer(ticket.key(), e))?;
            Ok::<Value, CacheError>(cache.write_through(&ticket, value, ttl).await)
        });

        match origin {
            FetchOrigin::Started => Counters::bump(&self.inner.counters.fetches_started),
            FetchOrigin::Joined => Counters::bump(&self.inner.counters.fetches_joined),
        }
        fetch
    }

    fn refresh_in_background<T, F, Fut, E>(&self, key: &str, ttl: Duration, producer: F)
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Counters::bump(&self.inner.counters.background_refreshes);
        let fetch = self.start_fetch(key, ttl, producer);
        let key = key.to_string();
        tokio::spawn(async move {
            // The durable value already served stays in place on failure.
            if let Err(e) = fetch.await {
                debug!(key = %key, error = %e, "Background refresh failed");
            }
        });
    }

    /// Store a freshly produced value in both tiers, unless the fetch was
    /// detached in the meantime. Durable failures are logged and counted but
    /// never fail the fetch.
    async fn write_through<T>(&self, ticket: &FetchTicket, value: T, ttl: Duration) -> Value
    where
        T: Serialize + Send + Sync + 'static,
    {
        let key = ticket.key();

        let writing = self.inner.durable_writes.read().await;
        if ticket.is_current() {
            let persisted = match serde_json::to_vec(&value) {
                Ok(payload) => self
                    .inner
                    .store
                    .persist(key, payload)
                    .await
                    .map_err(CacheError::from),
                Err(e) => Err(StorageError::serialize(key, e).into()),
            };
            if let Err(e) = persisted {
                Counters::bump(&self.inner.counters.durable_write_failures);
                warn!(key = %key, error = %e, "Failed to persist fetched value");
            }
        }
        drop(writing);

        let value: Value = Arc::new(value);
        let committed = ticket.commit(|| {
            self.inner.memory.lock().put(key, value.clone(), ttl);
        });
        if !committed {
            debug!(key = %key, "Fetch was detached, result not cached");
        }
        value
    }
}

fn downcast<T>(key: &str, value: Value) -> Result<T, CacheError>
where
    T: Any + Clone,
{
    (*value)
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| CacheError::TypeMismatch {
            key: key.to_string(),
        })
}
