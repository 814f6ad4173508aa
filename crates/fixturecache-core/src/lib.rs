//! fixturecache-core - caching layer for the fixtures, results and standings
//! viewer.
//!
//! Every view that needs remote data goes through a single [`CacheManager`],
//! built once at startup from the [`Config`] and shared by cloning.

pub mod cache;
pub mod config;
pub mod error;
pub mod store;

pub use cache::{CacheManager, CacheStats, Durability, FetchPolicy};
pub use config::Config;
pub use error::{CacheError, StorageError};
pub use store::{DurableRecord, DurableStore, FileStore};
