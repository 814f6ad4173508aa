//! Two-tier caching for every data-fetching path in the viewer.
//!
//! `CacheManager` combines:
//! - a capacity-bounded memory tier with per-entry TTL
//! - a durable store that survives restarts (see [`crate::store`])
//! - a registry that lets concurrent callers share one fetch per key
//!
//! Reads go memory first, then durable (served stale while a background
//! refresh runs), then the caller's producer.

pub mod manager;
pub mod memory;
pub mod policy;
pub mod registry;

pub use manager::{CacheManager, CacheStats};
pub use memory::{MemoryTier, Value, DEFAULT_MEMORY_CAPACITY};
pub use policy::{Durability, FetchPolicy};
pub use registry::{FetchOrigin, FetchRegistry, FetchTicket, SharedFetch};
