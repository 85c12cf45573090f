//! Persistent mapping from cache key to result file id

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{write_atomic, CacheError, CacheKey};

/// Integer id of a cached result file
pub type FileId = u64;

/// File name of the index inside the cache directory
pub const INDEX_FILE_NAME: &str = "query_index.json";

/// Id handed out when the index is empty
///
/// Starting at four digits keeps generated file names the same width.
pub const FIRST_FILE_ID: FileId = 1001;

/// Key → file id mapping, persisted as a JSON object
///
/// Every insertion rewrites the whole file (write, verify, rename). Removals
/// via [`QueryIndex::forget`] only touch memory and reach disk with the next
/// persist.
#[derive(Debug)]
pub struct QueryIndex {
    path: PathBuf,
    entries: BTreeMap<CacheKey, FileId>,
    dirty: bool,
}

impl QueryIndex {
    /// Loads the index from `path`
    ///
    /// # Returns
    /// * `Ok(QueryIndex)` - empty if the file does not exist
    /// * `Err(CacheError::MalformedIndex)` - if the file is not a valid index
    /// * `Err(CacheError::Io)` - if the file exists but cannot be read
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => parse_entries(&path, &content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        if !entries.is_empty() {
            tracing::debug!(path = %path.display(), entries = entries.len(), "query index loaded");
        }
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File id assigned to `key`, if any
    pub fn get(&self, key: &CacheKey) -> Option<FileId> {
        self.entries.get(key).copied()
    }

    /// Iterates over all entries in key order
    pub fn entries(&self) -> impl Iterator<Item = (&CacheKey, FileId)> {
        self.entries.iter().map(|(k, id)| (k, *id))
    }

    /// True when in-memory state has changes not yet on disk
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The id the next new key would receive
    pub fn next_file_id(&self) -> FileId {
        self.entries
            .values()
            .max()
            .map(|max| max + 1)
            .unwrap_or(FIRST_FILE_ID)
    }

    /// Returns the file id for `key`, allocating and persisting one if needed
    ///
    /// A key that is already present keeps its id, so re-saving a result
    /// overwrites the same file instead of leaking a new one.
    pub fn assign(&mut self, key: &CacheKey) -> Result<FileId, CacheError> {
        if let Some(id) = self.get(key) {
            return Ok(id);
        }
        let id = self.next_file_id();
        self.entries.insert(key.clone(), id);
        self.dirty = true;
        self.persist()?;
        Ok(id)
    }

    /// Drops `key` from memory without touching the file on disk
    pub fn forget(&mut self, key: &CacheKey) -> Option<FileId> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Writes the full mapping to disk
    ///
    /// The JSON is written to a temporary file, read back and compared before
    /// it replaces the previous index, so a failed write never clobbers the
    /// last good copy.
    pub fn persist(&mut self) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(&self.entries)?;

        let written = parse_entries(&self.path, &json)?;
        if written != self.entries {
            return Err(CacheError::IndexVerification {
                path: self.path.clone(),
            });
        }

        write_atomic(&self.path, json.as_bytes())?;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), entries = self.entries.len(), "query index saved");
        Ok(())
    }
}

fn parse_entries(path: &Path, content: &str) -> Result<BTreeMap<CacheKey, FileId>, CacheError> {
    serde_json::from_str(content).map_err(|source| CacheError::MalformedIndex {
        path: path.to_path_buf(),
        source,
    })
}
