//! Durable tier: records that survive a process restart.
//!
//! The store knows nothing about freshness. Every record carries the time it
//! was written, and the facade decides at read time whether that is recent
//! enough for the caller.

pub mod file;

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::StorageError;

pub use file::FileStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableRecord {
    pub key: String,
    pub payload: Vec<u8>,
    pub written_at: DateTime<Utc>,
}

impl DurableRecord {
    pub fn new(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            payload,
            written_at: Utc::now(),
        }
    }

    /// Time since the record was written. Clock skew into the future counts
    /// as zero age.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.written_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    pub fn age_minutes(&self) -> u64 {
        self.age().as_secs() / 60
    }

    /// Short label for "last updated" displays.
    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            let remaining_mins = minutes % 60;
            if remaining_mins >= 30 {
                // Round up: 1h 30m+ becomes 2h
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            let remaining_hours = (minutes % 1440) / 60;
            if remaining_hours >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Byte-oriented key/value medium behind the cache.
///
/// A missing key is never an error: `load` returns `Ok(None)` and `remove`
/// succeeds. `clear` only touches keys the store itself has persisted, since
/// the medium may be shared with unrelated data.
pub trait DurableStore: Send + Sync + 'static {
    /// Overwrite the record for `key`, stamping it with the current time.
    fn persist<'a>(&'a self, key: &'a str, payload: Vec<u8>)
        -> BoxFuture<'a, Result<(), StorageError>>;

    fn load<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, Result<Option<DurableRecord>, StorageError>>;

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;

    fn clear(&self) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Keys currently persisted through this store.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, StorageError>>;
}
