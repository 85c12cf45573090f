//! JSON file cache for dataset descriptors and variable catalogs
//!
//! Each entry is a single JSON file named after its key, stored alongside the
//! query results. Entries never expire; callers refresh them explicitly.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{write_atomic, CacheError};

/// A metadata document together with the time it was fetched
///
/// This is also the on-disk envelope: `{"data": ..., "cached_at": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

/// Metadata documents keyed by name, one JSON file each
#[derive(Debug, Clone)]
pub struct MetadataCache {
    cache_dir: PathBuf,
}

impl MetadataCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// File backing `key`, e.g. `ACSProfile5Y2015_vars.json`
    pub fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    /// Stores `data` under `key`, stamped with the current time
    ///
    /// # Returns
    /// * `Ok(PathBuf)` - the file written
    /// * `Err(CacheError)` if serialization or the atomic write fails
    pub fn write<T: Serialize>(&self, key: &str, data: &T) -> Result<PathBuf, CacheError> {
        let envelope = CachedData {
            data,
            cached_at: Utc::now(),
        };
        let path = self.cache_path(key);
        write_atomic(&path, serde_json::to_string_pretty(&envelope)?.as_bytes())?;
        tracing::debug!(path = %path.display(), "metadata cached");
        Ok(path)
    }

    /// Loads the document stored under `key`
    ///
    /// Anything unreadable counts as absent, so the caller fetches a fresh
    /// copy; a file that exists but does not parse is logged.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<CachedData<T>> {
        let path = self.cache_path(key);
        let text = fs::read_to_string(&path)
            .map_err(|e| {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read cached metadata");
                }
            })
            .ok()?;

        serde_json::from_str(&text)
            .map_err(|e| tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt cached metadata"))
            .ok()
    }
}
