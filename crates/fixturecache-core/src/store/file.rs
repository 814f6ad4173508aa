use std::collections::BTreeSet;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{DurableRecord, DurableStore};
use crate::error::StorageError;

/// Ledger of every key this store has written. Record writes and removals
/// happen while holding the ledger lock, so the two never disagree.
const LEDGER_FILE: &str = ".keys.json";

/// Key used in errors about the ledger itself.
const LEDGER_KEY: &str = "<ledger>";

#[derive(Serialize)]
struct RecordFileRef<'a> {
    key: &'a str,
    written_at: DateTime<Utc>,
    payload: &'a RawValue,
}

#[derive(Deserialize)]
struct RecordFile {
    key: String,
    written_at: DateTime<Utc>,
    payload: Box<RawValue>,
}

/// One pretty-printed JSON file per key inside a cache directory.
///
/// Payloads must be JSON documents; they are embedded verbatim so the files
/// stay readable. Writes go to a temporary file first and are renamed into
/// place, so a reader never sees half a record.
pub struct FileStore {
    cache_dir: PathBuf,
    /// Serializes ledger read-modify-write cycles.
    ledger: Mutex<()>,
}

impl FileStore {
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir).map_err(|e| StorageError::io(LEDGER_KEY, e))?;
        debug!(?cache_dir, "File store opened");
        Ok(Self {
            cache_dir,
            ledger: Mutex::new(()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", encode_key(key)))
    }

    fn ledger_path(&self) -> PathBuf {
        self.cache_dir.join(LEDGER_FILE)
    }

    /// Write a record with an explicit timestamp.
    ///
    /// The key is added to the ledger before the record lands, so `clear`
    /// can always find it. A ledger entry without a record file is harmless.
    pub(crate) async fn write_record(&self, record: &DurableRecord) -> Result<(), StorageError> {
        let key = record.key.as_str();
        let payload: &RawValue = serde_json::from_slice(&record.payload)
            .map_err(|e| StorageError::serialize(key, e))?;
        let contents = serde_json::to_vec_pretty(&RecordFileRef {
            key,
            written_at: record.written_at,
            payload,
        })
        .map_err(|e| StorageError::serialize(key, e))?;

        let _guard = self.ledger.lock().await;
        let mut keys = self.read_ledger().await?;
        if keys.insert(key.to_string()) {
            self.write_ledger(&keys).await?;
        }

        write_atomic(self.record_path(key), contents)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    async fn read_record(&self, key: &str) -> Result<Option<DurableRecord>, StorageError> {
        let contents = match tokio::fs::read(self.record_path(key)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(key, e)),
        };

        let file: RecordFile = serde_json::from_slice(&contents)
            .map_err(|e| StorageError::corrupt(key, e.to_string()))?;
        if file.key != key {
            return Err(StorageError::corrupt(
                key,
                format!("record belongs to key {:?}", file.key),
            ));
        }

        Ok(Some(DurableRecord {
            key: file.key,
            payload: file.payload.get().as_bytes().to_vec(),
            written_at: file.written_at,
        }))
    }

    async fn delete_record(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn read_ledger(&self) -> Result<BTreeSet<String>, StorageError> {
        match tokio::fs::read(self.ledger_path()).await {
            Ok(contents) => serde_json::from_slice(&contents)
                .map_err(|e| StorageError::corrupt(LEDGER_KEY, e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(StorageError::io(LEDGER_KEY, e)),
        }
    }

    async fn write_ledger(&self, keys: &BTreeSet<String>) -> Result<(), StorageError> {
        let contents =
            serde_json::to_vec_pretty(keys).map_err(|e| StorageError::serialize(LEDGER_KEY, e))?;
        write_atomic(self.ledger_path(), contents)
            .await
            .map_err(|e| StorageError::io(LEDGER_KEY, e))
    }
}

impl DurableStore for FileStore {
    fn persist<'a>(
        &'a self,
        key: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        async move { self.write_record(&DurableRecord::new(key, payload)).await }.boxed()
    }

    fn load<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<DurableRecord>, StorageError>> {
        self.read_record(key).boxed()
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        async move {
            let _guard = self.ledger.lock().await;
            self.delete_record(key).await?;

            let mut keys = self.read_ledger().await?;
            if keys.remove(key) {
                self.write_ledger(&keys).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            let _guard = self.ledger.lock().await;
            let keys = self.read_ledger().await?;

            let mut remaining = BTreeSet::new();
            let mut first_error = None;
            for key in keys {
                if let Err(e) = self.delete_record(&key).await {
                    warn!(key = %key, error = %e, "Failed to remove cache record");
                    remaining.insert(key);
                    first_error.get_or_insert(e);
                }
            }
            self.write_ledger(&remaining).await?;

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        .boxed()
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, StorageError>> {
        async move {
            let _guard = self.ledger.lock().await;
            Ok(self.read_ledger().await?.into_iter().collect())
        }
        .boxed()
    }
}

/// Write `contents` to a uniquely named temporary file next to `path`, then
/// rename it into place. Concurrent writers of the same path, in this process
/// or another, each publish a complete file.
async fn write_atomic(path: PathBuf, contents: Vec<u8>) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = NamedTempFile::new_in(dir)?;
        temp_file.write_all(&contents)?;
        temp_file.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Make an arbitrary key safe to use as a file name.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. The encoding never yields a leading dot, so records cannot collide
/// with the ledger.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    if encoded.is_empty() {
        encoded.push('%');
    }
    encoded
}
