//! Load/save of query results by cache key

use std::path::{Path, PathBuf};

use super::{
    ensure_cache_dir, make_key, CacheError, CacheKey, QueryIndex, ResultStore, INDEX_FILE_NAME,
};
use crate::data::Table;

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLoad {
    /// The key is cached and its result file was read
    Hit { table: Table, path: PathBuf },
    /// The key is not in the index
    Miss,
    /// The key was indexed but its result file is gone
    ///
    /// The entry has been dropped from the in-memory index; the change is
    /// written out with the next save.
    Stale { path: PathBuf },
}

impl CacheLoad {
    /// The cached table, if this was a hit
    pub fn into_table(self) -> Option<Table> {
        match self {
            CacheLoad::Hit { table, .. } => Some(table),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLoad::Hit { .. })
    }
}

/// Query result cache: index plus result files in one directory
#[derive(Debug)]
pub struct QueryCache {
    dir: PathBuf,
    index: QueryIndex,
    results: ResultStore,
}

impl QueryCache {
    /// Opens the cache in `dir`, creating the directory if needed
    ///
    /// # Returns
    /// * `Ok(QueryCache)` on success
    /// * `Err(CacheError::Configuration)` if `dir` is empty or not a directory
    /// * `Err(CacheError::MalformedIndex)` if an existing index cannot be parsed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        ensure_cache_dir(&dir)?;
        let index = QueryIndex::open(dir.join(INDEX_FILE_NAME))?;
        let results = ResultStore::new(&dir);
        Ok(Self {
            dir,
            index,
            results,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &QueryIndex {
        &self.index
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    /// Builds the cache key for a request; see [`make_key`]
    pub fn make_key<K, V>(&self, base_url: &str, params: &[(K, V)]) -> Result<CacheKey, CacheError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        make_key(base_url, params)
    }

    /// Looks up the cached result for `key`
    ///
    /// An unknown key is an ordinary miss. A known key whose file has been
    /// removed is reported as [`CacheLoad::Stale`] and forgotten in memory so
    /// that a later save allocates cleanly.
    pub fn load(&mut self, key: &CacheKey) -> Result<CacheLoad, CacheError> {
        let Some(file_id) = self.index.get(key) else {
            return Ok(CacheLoad::Miss);
        };

        match self.results.read(file_id) {
            Ok(table) => Ok(CacheLoad::Hit {
                table,
                path: self.results.path_for(file_id),
            }),
            Err(CacheError::MissingResult { path }) => {
                tracing::warn!(
                    path = %path.display(),
                    key = %key,
                    "query index cache file missing"
                );
                self.index.forget(key);
                Ok(CacheLoad::Stale { path })
            }
            Err(e) => Err(e),
        }
    }

    /// Stores `table` under `key`, overwriting any previous result for it
    ///
    /// # Returns
    /// * `Ok(PathBuf)` - the result file written
    /// * `Err(CacheError)` if the result or the index cannot be written
    pub fn save(&mut self, key: &CacheKey, table: &Table) -> Result<PathBuf, CacheError> {
        let file_id = self.index.assign(key)?;
        let path = self.results.write(file_id, table)?;
        if self.index.is_dirty() {
            self.index.persist()?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Column, ColumnType, Value};
    use std::fs;
    use tempfile::TempDir;

    const URL: &str = "https://api.census.gov/data/2015/acs5";

    fn create_test_cache() -> (QueryCache, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache = QueryCache::open(temp_dir.path()).expect("open");
        (cache, temp_dir)
    }

    fn key_for(state: &str) -> CacheKey {
        let clause = format!("state:{}", state);
        make_key(URL, &[("get", "NAME,X"), ("for", clause.as_str()), ("key", "k")]).unwrap()
    }

    fn table_with(name: &str, x: i64) -> Table {
        let mut table = Table::new(vec![Column::text("NAME"), Column::new("X", ColumnType::Integer)]);
        table.push_row(vec![name.into(), Value::Int(x)]);
        table
    }

    #[test]
    fn test_load_unknown_key_is_miss() {
        let (mut cache, _temp_dir) = create_test_cache();
        assert_eq!(cache.load(&key_for("06")).unwrap(), CacheLoad::Miss);
    }

    #[test]
    fn test_save_then_load_returns_same_table() {
        let (mut cache, _temp_dir) = create_test_cache();
        let key = key_for("06");
        let table = table_with("California", 10);

        let saved_path = cache.save(&key, &table).expect("save");

        match cache.load(&key).expect("load") {
            CacheLoad::Hit { table: loaded, path } => {
                assert_eq!(loaded, table);
                assert_eq!(path, saved_path);
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_save_twice_overwrites_without_leaking_files() {
        let (mut cache, _temp_dir) = create_test_cache();
        let key = key_for("06");

        cache.save(&key, &table_with("first", 1)).unwrap();
        cache.save(&key, &table_with("second", 2)).unwrap();

        let loaded = cache.load(&key).unwrap().into_table().unwrap();
        assert_eq!(loaded, table_with("second", 2));
        assert_eq!(cache.results().stored_ids().unwrap(), vec![1001]);
        assert_eq!(cache.index().len(), 1);
        assert_eq!(cache.index().next_file_id(), 1002);
    }

    #[test]
    fn test_cache_survives_reopen() {
        let (mut cache, temp_dir) = create_test_cache();
        let key = key_for("41");
        cache.save(&key, &table_with("Oregon", 4)).unwrap();
        drop(cache);

        let mut reopened = QueryCache::open(temp_dir.path()).unwrap();
        assert!(reopened.load(&key).unwrap().is_hit());
    }

    #[test]
    fn test_missing_result_file_is_stale_then_recoverable() {
        let (mut cache, _temp_dir) = create_test_cache();
        let key = key_for("06");
        let path = cache.save(&key, &table_with("California", 10)).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(cache.load(&key).unwrap(), CacheLoad::Stale { path: path.clone() });
        assert_eq!(cache.load(&key).unwrap(), CacheLoad::Miss);

        cache.save(&key, &table_with("California", 11)).unwrap();
        let loaded = cache.load(&key).unwrap().into_table().unwrap();
        assert_eq!(loaded, table_with("California", 11));
    }

    #[test]
    fn test_stale_entry_is_dropped_from_disk_only_on_next_save() {
        let (mut cache, temp_dir) = create_test_cache();
        let stale = key_for("06");
        let other = key_for("41");
        let path = cache.save(&stale, &table_with("California", 10)).unwrap();
        fs::remove_file(&path).unwrap();

        cache.load(&stale).unwrap();
        let on_disk = QueryIndex::open(temp_dir.path().join(INDEX_FILE_NAME)).unwrap();
        assert!(on_disk.get(&stale).is_some(), "stale load must not rewrite the index");

        cache.save(&other, &table_with("Oregon", 4)).unwrap();
        let on_disk = QueryIndex::open(temp_dir.path().join(INDEX_FILE_NAME)).unwrap();
        assert!(on_disk.get(&stale).is_none());
        assert!(on_disk.get(&other).is_some());
    }

    #[test]
    fn test_open_rejects_file_path() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        fs::write(&file, "").unwrap();

        let err = QueryCache::open(&file).unwrap_err();
        assert!(matches!(err, CacheError::Configuration { .. }));
    }

    #[test]
    fn test_open_propagates_malformed_index() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(INDEX_FILE_NAME), "[1, 2").unwrap();

        let err = QueryCache::open(temp_dir.path()).unwrap_err();
        assert!(matches!(err, CacheError::MalformedIndex { .. }));
    }
}
