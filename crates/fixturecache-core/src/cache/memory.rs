//! Capacity-bounded in-process tier.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Type-erased value held by the memory tier and shared between fetch waiters.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Default number of entries kept in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct CacheEntry {
    pub value: Value,
    /// `None` when `now + ttl` is past the clock's range: the entry never
    /// expires.
    pub expires_at: Option<Instant>,
    /// Insertion sequence number, used for eviction order.
    seq: u64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// Memory tier evicting the least-recently-inserted entry once full.
///
/// Expired entries are never returned: `get` drops them as it finds them,
/// even if capacity pressure has not evicted them yet.
pub struct MemoryTier {
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
    /// Insertion order (oldest first), keyed by sequence number.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn put(&mut self, key: &str, value: Value, ttl: Duration) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let entry = CacheEntry {
            value,
            expires_at: Instant::now().checked_add(ttl),
            seq,
        };
        if let Some(old) = self.entries.insert(key.to_string(), entry) {
            self.order.remove(&old.seq);
        }
        self.order.insert(seq, key.to_string());

        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                self.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.order.remove(&entry.seq);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}
