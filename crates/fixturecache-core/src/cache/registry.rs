//! De-duplication of concurrent fetches.
//!
//! Every running fetch is a detached tokio task whose result is published
//! through a `oneshot` channel wrapped in [`Shared`], so any number of callers
//! can await the same computation. A caller that gives up waiting only drops
//! its clone of the channel; the task keeps running for everybody else.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::memory::Value;
use crate::error::CacheError;

/// Awaitable handle shared by every caller of one fetch.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value, CacheError>>>;

struct InFlight {
    id: u64,
    channel: SharedFetch,
}

#[derive(Default)]
struct RegistryInner {
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct FetchRegistry {
    inner: Arc<RegistryInner>,
}

/// Whether a call to [`FetchRegistry::fetch`] started a computation or
/// attached to one already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    Started,
    Joined,
}

impl FetchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the running fetch for `key`, or spawn `computation` as a new one.
    ///
    /// The lookup and the registration happen under one lock, so two racing
    /// callers can never both start a computation. `computation` is only
    /// called when a new fetch starts. Its entry is evicted from the registry
    /// before the result is published, so a caller arriving after completion
    /// starts afresh instead of replaying the old outcome.
    pub fn fetch<F, Fut>(&self, key: &str, computation: F) -> (SharedFetch, FetchOrigin)
    where
        F: FnOnce(FetchTicket) -> Fut,
        Fut: Future<Output = Result<Value, CacheError>> + Send + 'static,
    {
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            trace!(key = %key, "Joined in-flight fetch");
            return (existing.channel.clone(), FetchOrigin::Joined);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let ticket = FetchTicket {
            registry: self.clone(),
            key: key.to_string(),
            id,
        };
        let eviction = EvictOnDrop {
            registry: self.clone(),
            key: key.to_string(),
            id,
        };

        let (sender, receiver) = oneshot::channel();
        let interrupted_key = key.to_string();
        let channel = receiver
            .map(move |result| {
                result.unwrap_or_else(|_canceled| {
                    Err(CacheError::Interrupted {
                        key: interrupted_key,
                    })
                })
            })
            .boxed()
            .shared();

        let computation = computation(ticket);
        tokio::spawn(async move {
            let result = computation.await;
            // Evict first: callers either get this channel before it resolves,
            // or they start a new fetch.
            drop(eviction);
            sender.send(result).ok();
        });

        debug!(key = %key, "Started fetch");
        in_flight.insert(
            key.to_string(),
            InFlight {
                id,
                channel: channel.clone(),
            },
        );
        (channel, FetchOrigin::Started)
    }

    /// Detach the running fetch for `key`, if any.
    ///
    /// The computation still runs and its current waiters still get the
    /// result, but new callers start a fresh fetch and the detached one is no
    /// longer [current](FetchTicket::is_current).
    pub fn cancel(&self, key: &str) -> bool {
        let cancelled = self.inner.in_flight.lock().remove(key).is_some();
        if cancelled {
            debug!(key = %key, "Detached in-flight fetch");
        }
        cancelled
    }

    pub fn cancel_all(&self) -> usize {
        let mut in_flight = self.inner.in_flight.lock();
        let count = in_flight.len();
        in_flight.clear();
        count
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.in_flight.lock().contains_key(key)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    fn is_registered(in_flight: &HashMap<String, InFlight>, key: &str, id: u64) -> bool {
        in_flight.get(key).is_some_and(|entry| entry.id == id)
    }
}

/// Identity of one running computation, handed to the computation itself.
pub struct FetchTicket {
    registry: FetchRegistry,
    key: String,
    id: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// False once the fetch has been detached by [`FetchRegistry::cancel`].
    pub fn is_current(&self) -> bool {
        let in_flight = self.registry.inner.in_flight.lock();
        FetchRegistry::is_registered(&in_flight, &self.key, self.id)
    }

    /// Run `apply` only if this fetch is still current, holding the registry
    /// lock so a concurrent cancel cannot interleave. Returns whether it ran.
    pub fn commit(&self, apply: impl FnOnce()) -> bool {
        let in_flight = self.registry.inner.in_flight.lock();
        if FetchRegistry::is_registered(&in_flight, &self.key, self.id) {
            apply();
            true
        } else {
            false
        }
    }
}

/// Removes a computation's registry entry when its task finishes or unwinds.
struct EvictOnDrop {
    registry: FetchRegistry,
    key: String,
    id: u64,
}

impl Drop for EvictOnDrop {
    fn drop(&mut self) {
        let mut in_flight = self.registry.inner.in_flight.lock();
        if FetchRegistry::is_registered(&in_flight, &self.key, self.id) {
            in_flight.remove(&self.key);
        }
    }
}
