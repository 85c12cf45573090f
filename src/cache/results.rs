//! Flat-file storage of cached query results

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use super::{tmp_path_for, CacheError, FileId};
use crate::data::Table;

const FILE_PREFIX: &str = "qc";
const FILE_EXTENSION: &str = "csv";

/// Stores one CSV file per file id
///
/// File names carry the id zero-padded to nine digits (`qc000001001.csv`) so
/// that directory listings sort in allocation order.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the file backing `file_id`
    pub fn path_for(&self, file_id: FileId) -> PathBuf {
        self.dir
            .join(format!("{}{:09}.{}", FILE_PREFIX, file_id, FILE_EXTENSION))
    }

    /// Recovers the file id from a result file path
    pub fn file_id_of(path: &Path) -> Option<FileId> {
        let stem = path.file_stem()?.to_str()?;
        let digits = stem.strip_prefix(FILE_PREFIX)?;
        if path.extension()? != FILE_EXTENSION {
            return None;
        }
        digits.parse().ok()
    }

    pub fn exists(&self, file_id: FileId) -> bool {
        self.path_for(file_id).is_file()
    }

    /// Writes `table` to the file for `file_id`, replacing any previous content
    pub fn write(&self, file_id: FileId, table: &Table) -> Result<PathBuf, CacheError> {
        let path = self.path_for(file_id);
        let tmp_path = tmp_path_for(&path);

        let file = File::create(&tmp_path).map_err(|e| CacheError::io(&tmp_path, e))?;
        table
            .write_csv(file, true)
            .map_err(|source| CacheError::Table {
                path: tmp_path.clone(),
                source,
            })?;
        fs::rename(&tmp_path, &path).map_err(|e| CacheError::io(&path, e))?;

        tracing::debug!(path = %path.display(), rows = table.num_rows(), "query results cached");
        Ok(path)
    }

    /// Reads the table stored for `file_id`
    ///
    /// # Returns
    /// * `Ok(Table)` - the stored table
    /// * `Err(CacheError::MissingResult)` - if no file exists for the id
    /// * `Err(CacheError::Table)` - if the file cannot be parsed
    pub fn read(&self, file_id: FileId) -> Result<Table, CacheError> {
        let path = self.path_for(file_id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::MissingResult { path });
            }
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        Table::read_csv(BufReader::new(file)).map_err(|source| CacheError::Table { path, source })
    }

    /// Ids of every result file present in the directory, ascending
    pub fn stored_ids(&self) -> Result<Vec<FileId>, CacheError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let mut ids: Vec<FileId> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Self::file_id_of(&entry.path()))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
