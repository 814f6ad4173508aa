//! Application configuration management.
//!
//! Configuration is stored at `~/.config/fixturecache/config.json` and holds
//! the memory tier capacity, an optional cache directory override and the
//! season whose data is being viewed. Durable records live under
//! `~/.cache/fixturecache/<season>/` unless overridden.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cache::{CacheManager, DEFAULT_MEMORY_CAPACITY};
use crate::store::FileStore;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fixturecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "FIXTURECACHE_CACHE_DIR";

fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub season: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            cache_dir: None,
            season: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the durable records.
    ///
    /// Precedence: the environment override, then the configured directory,
    /// then the platform cache directory. The season, when set, is appended.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let base = match std::env::var_os(CACHE_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => match &self.cache_dir {
                Some(dir) => dir.clone(),
                None => dirs::cache_dir()
                    .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?
                    .join(APP_NAME),
            },
        };

        Ok(match &self.season {
            Some(season) => base.join(season),
            None => base,
        })
    }

    /// Open the durable store and build the process-wide cache.
    pub fn open_cache(&self) -> Result<CacheManager> {
        let cache_dir = self.cache_dir()?;
        let store = FileStore::open(&cache_dir)
            .with_context(|| format!("Failed to open cache directory: {}", cache_dir.display()))?;
        Ok(CacheManager::new(Arc::new(store), self.memory_capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.memory_capacity, DEFAULT_MEMORY_CAPACITY);
        assert!(config.cache_dir.is_none());
        assert!(config.season.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"season": "2024"}"#).unwrap();
        assert_eq!(config.memory_capacity, DEFAULT_MEMORY_CAPACITY);
        assert_eq!(config.season.as_deref(), Some("2024"));
    }

    #[test]
    fn test_cache_dir_uses_override_and_season() {
        // Skip when the environment already forces a directory
        if std::env::var_os(CACHE_DIR_ENV).is_some() {
            return;
        }
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/fixtures")),
            season: Some("2024".to_string()),
            ..Config::default()
        };
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/fixtures/2024"));
    }

    #[tokio::test]
    async fn test_open_cache_creates_directory() {
        if std::env::var_os(CACHE_DIR_ENV).is_some() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_dir: Some(dir.path().join("cache")),
            memory_capacity: 4,
            season: None,
        };

        let cache = config.open_cache().unwrap();
        assert!(dir.path().join("cache").is_dir());
        assert!(cache.store().keys().await.unwrap().is_empty());
    }
}
