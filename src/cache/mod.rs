//! On-disk cache for Census query results and dataset metadata
//!
//! Query results are addressed by a normalized request signature (the cache
//! key), mapped to an integer file id by a JSON index, and stored as one CSV
//! file per id. Dataset descriptors and variable catalogs are stored as JSON
//! files keyed by dataset name.
//!
//! The cache assumes a single writer: the index is rewritten in full on every
//! mutation, so two processes sharing a cache directory can race each other.
//! There is no eviction and no expiry.

mod index;
mod key;
mod metadata;
mod query_cache;
mod results;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::data::TableError;

pub use index::{FileId, QueryIndex, FIRST_FILE_ID, INDEX_FILE_NAME};
pub use key::{make_key, CacheKey, CREDENTIAL_PARAM};
pub use metadata::{CachedData, MetadataCache};
pub use query_cache::{CacheLoad, QueryCache};
pub use results::ResultStore;

/// Errors raised by the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache directory is unusable
    #[error("Invalid cache dir [{}]: {reason}", .path.display())]
    Configuration { path: PathBuf, reason: String },

    /// Reading or writing a cache file failed
    #[error("I/O error on [{}]: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted index is not valid JSON
    #[error("Malformed query index [{}]: {source}", .path.display())]
    MalformedIndex {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A freshly written index did not read back the same
    #[error("Query index [{}] failed verification after write", .path.display())]
    IndexVerification { path: PathBuf },

    /// A result file the index points at does not exist
    #[error("Cached result [{}] is missing", .path.display())]
    MissingResult { path: PathBuf },

    /// A result file exists but cannot be parsed or written
    #[error("Cached result [{}] is unreadable: {source}", .path.display())]
    Table {
        path: PathBuf,
        #[source]
        source: TableError,
    },

    /// The base URL of a request cannot be parsed
    #[error("Cannot build cache key from [{url}]: {source}")]
    Key {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Serializing cache content failed
    #[error("Failed to serialize cache content: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Validates a cache directory, creating it when absent
///
/// # Returns
/// * `Ok(())` if the directory exists or was created
/// * `Err(CacheError::Configuration)` if the path is empty or names something
///   other than a directory
pub fn ensure_cache_dir(path: &Path) -> Result<(), CacheError> {
    if path.as_os_str().is_empty() {
        return Err(CacheError::Configuration {
            path: path.to_path_buf(),
            reason: "must specify a cache dir".to_string(),
        });
    }
    if path.exists() {
        if !path.is_dir() {
            return Err(CacheError::Configuration {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| CacheError::Configuration {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    tracing::debug!(path = %path.display(), "created cache dir");
    Ok(())
}

/// Writes `contents` next to `path` and renames it into place
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, contents).map_err(|e| CacheError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| CacheError::io(path, e))
}

pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
