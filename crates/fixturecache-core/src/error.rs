use std::sync::Arc;

use thiserror::Error;

/// Boxed error type accepted from producers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the durable medium.
///
/// Sources are wrapped in `Arc` so a single failure can be handed to every
/// caller that was waiting on the same fetch.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("I/O error for cache key {key:?}: {source}")]
    Io {
        key: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Corrupt cache record {key:?}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Failed to serialize value for cache key {key:?}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: Arc<serde_json::Error>,
    },
}

impl StorageError {
    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        StorageError::Io {
            key: key.to_string(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        StorageError::Corrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn serialize(key: &str, source: serde_json::Error) -> Self {
        StorageError::Serialize {
            key: key.to_string(),
            source: Arc::new(source),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Fetch failed for cache key {key:?}: {source}")]
    Producer {
        key: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// No usable value in either tier. Only used internally to steer
    /// `get_or_fetch` towards the producer.
    #[error("No cached value available")]
    NotFound,

    #[error("Cached value for key {key:?} has a different type than requested")]
    TypeMismatch { key: String },

    #[error("Fetch for cache key {key:?} ended without a result")]
    Interrupted { key: String },
}

impl CacheError {
    pub(crate) fn producer(key: &str, source: impl Into<BoxError>) -> Self {
        CacheError::Producer {
            key: key.to_string(),
            source: Arc::from(source.into()),
        }
    }

    /// True when the failure came from the caller's producer rather than
    /// from the cache itself.
    pub fn is_producer_error(&self) -> bool {
        matches!(self, CacheError::Producer { .. })
    }
}
