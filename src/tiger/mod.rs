//! TIGER cartographic boundary files
//!
//! Downloads zipped shapefiles from the Census Bureau's cartographic
//! boundary directory and converts them to GeoJSON with `ogr2ogr`. Both the
//! archive and the converted GeoJSON are kept in the cache directory, so a
//! boundary set is downloaded and converted at most once.
//!
//! Archive names look like:
//! - `cb_2014_28_place_500k.zip`
//! - `cb_2015_us_county_20m.zip`
//! - `cb_2016_34_puma10_500k.zip`
//!
//! See <https://www2.census.gov/geo/tiger/>.

mod convert;
mod fetch;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cache::{ensure_cache_dir, CacheError};
use crate::config::{TigerConfig, Transport};
use crate::data::Table;

pub use convert::{
    converter_args, converter_available, geojson_to_table, read_geojson, run_converter,
    unpack_archive, GEOMETRY_COLUMN,
};
pub use fetch::{archive_dir, archive_links, ArchiveFetcher, FtpFetcher, HttpFetcher};

/// Cartographic boundary files, as opposed to `tl` for TIGER/Line
const CONTENT_TYPE: &str = "cb";

/// Errors that can occur while downloading or converting boundary files
#[derive(Debug, Error)]
pub enum TigerError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Download failed [{status}] for [{url}]")]
    Status { status: u16, url: String },

    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("I/O error on [{}]: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid GeoJSON: {0}")]
    GeoJson(String),
}

impl TigerError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        TigerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One boundary file: a year, region, entity type and resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryRequest {
    pub year: u16,
    /// State FIPS code, or `us` for national files
    pub region: String,
    /// Entity type, e.g. `state`, `county`, `place`, `puma10`
    pub entity: String,
    /// Usually `500k`, `5m` or `20m`
    pub resolution: String,
}

impl BoundaryRequest {
    pub fn new(
        year: u16,
        region: impl Into<String>,
        entity: impl Into<String>,
        resolution: impl Into<String>,
    ) -> Self {
        Self {
            year,
            region: region.into(),
            entity: entity.into(),
            resolution: resolution.into(),
        }
    }

    pub fn basename(&self) -> String {
        archive_basename(self.year, &self.region, &self.entity, &self.resolution)
    }
}

/// Builds the archive basename, e.g. `cb_2016_us_state_20m`
pub fn archive_basename(year: u16, region: &str, entity: &str, resolution: &str) -> String {
    format!("{CONTENT_TYPE}_{year}_{region}_{entity}_{resolution}")
}

/// Downloads boundary archives and converts them to tables
pub struct TigerDownloader {
    config: TigerConfig,
    fetcher: Box<dyn ArchiveFetcher>,
}

impl TigerDownloader {
    /// Creates a downloader using the transport named in `config`
    ///
    /// The cache directory is created if missing, except in dry-run mode.
    pub fn new(config: TigerConfig) -> Result<Self, TigerError> {
        let fetcher: Box<dyn ArchiveFetcher> = match config.transport {
            Transport::Http => Box::new(HttpFetcher::new(&config.http_base, config.timeout)?),
            Transport::Ftp => Box::new(FtpFetcher::new(&config.ftp_host)),
        };
        Self::with_fetcher(config, fetcher)
    }

    /// Creates a downloader with an explicit archive source
    pub fn with_fetcher(
        config: TigerConfig,
        fetcher: Box<dyn ArchiveFetcher>,
    ) -> Result<Self, TigerError> {
        if config.dry_run {
            if config.cache_dir.as_os_str().is_empty()
                || (config.cache_dir.exists() && !config.cache_dir.is_dir())
            {
                return Err(CacheError::Configuration {
                    path: config.cache_dir.clone(),
                    reason: "not a usable cache directory".to_string(),
                }
                .into());
            }
        } else {
            ensure_cache_dir(&config.cache_dir)?;
        }
        Ok(Self { config, fetcher })
    }

    pub fn config(&self) -> &TigerConfig {
        &self.config
    }

    /// Cached location of the request's zip archive
    pub fn archive_path(&self, request: &BoundaryRequest) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}.zip", request.basename()))
    }

    /// Cached location of the request's converted GeoJSON
    pub fn geojson_path(&self, request: &BoundaryRequest) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}.geojson", request.basename()))
    }

    /// Lists archive names available for `year`
    ///
    /// Returns an empty list in dry-run mode.
    pub async fn list(&self, year: u16) -> Result<Vec<String>, TigerError> {
        if self.config.dry_run {
            tracing::info!(dir = %archive_dir(year), "dry run, skipping listing");
            return Ok(Vec::new());
        }
        self.fetcher.list(year).await
    }

    /// Downloads the request's archive into the cache
    ///
    /// # Arguments
    /// * `use_cache` - skip the download when the archive is already cached
    ///
    /// # Returns
    /// The archive path. In dry-run mode nothing is downloaded.
    pub async fn fetch(
        &self,
        request: &BoundaryRequest,
        use_cache: bool,
    ) -> Result<PathBuf, TigerError> {
        let path = self.archive_path(request);
        if use_cache && path.exists() {
            tracing::debug!(path = %path.display(), "archive cached, skipping download");
            return Ok(path);
        }
        if self.config.dry_run {
            tracing::info!(path = %path.display(), "dry run, skipping download");
            return Ok(path);
        }

        let name = format!("{}.zip", request.basename());
        self.fetcher.fetch(&name, request.year, &path).await?;
        Ok(path)
    }

    /// Converts the cached archive to GeoJSON and reads it
    ///
    /// A missing or failing converter is logged and yields an empty table.
    ///
    /// # Arguments
    /// * `simplify` - `ogr2ogr` simplification tolerance, `0` to disable
    /// * `use_cache` - reuse an existing GeoJSON file instead of converting
    pub async fn unpack(
        &self,
        request: &BoundaryRequest,
        simplify: f64,
        use_cache: bool,
    ) -> Result<Table, TigerError> {
        let geojson = self.geojson_path(request);
        if use_cache && geojson.exists() {
            tracing::debug!(path = %geojson.display(), "GeoJSON cached, skipping conversion");
            return read_geojson(&geojson);
        }
        if self.config.dry_run {
            tracing::info!(path = %geojson.display(), "dry run, skipping conversion");
            return Ok(Table::default());
        }

        if !converter_available(&self.config.converter) {
            tracing::warn!(converter = %self.config.converter, "converter not installed");
            return Ok(Table::default());
        }

        let workdir = tempfile::TempDir::new().map_err(|e| TigerError::io(Path::new("tempdir"), e))?;
        unpack_archive(&self.archive_path(request), workdir.path())?;
        let shapefile = workdir.path().join(format!("{}.shp", request.basename()));

        // ogr2ogr refuses to overwrite an existing GeoJSON file
        remove_if_exists(&geojson)?;

        let args = converter_args(simplify, &geojson, &shapefile);
        if !run_converter(&self.config.converter, &args).await? {
            remove_if_exists(&geojson)?;
            return Ok(Table::default());
        }

        let table = read_geojson(&geojson)?;
        tracing::info!(
            path = %geojson.display(),
            features = table.num_rows(),
            "converted"
        );
        Ok(table)
    }

    /// Fetches and converts a boundary file in one step
    pub async fn query(
        &self,
        request: &BoundaryRequest,
        simplify: f64,
        use_cache: bool,
    ) -> Result<Table, TigerError> {
        self.fetch(request, use_cache).await?;
        self.unpack(request, simplify, use_cache).await
    }
}

fn remove_if_exists(path: &Path) -> Result<(), TigerError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TigerError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Counts fetches and writes a fixed payload
    struct CountingFetcher {
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ArchiveFetcher for CountingFetcher {
        async fn fetch(&self, _name: &str, _year: u16, dest: &Path) -> Result<(), TigerError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, b"zip").map_err(|e| TigerError::io(dest, e))
        }

        async fn list(&self, _year: u16) -> Result<Vec<String>, TigerError> {
            Ok(vec!["cb_2016_us_state_20m.zip".to_string()])
        }
    }

    fn create_test_downloader(dry_run: bool) -> (TigerDownloader, Arc<AtomicUsize>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let fetches = Arc::new(AtomicUsize::new(0));
        let config = TigerConfig::new(temp_dir.path().join("tiger"))
            .with_dry_run(dry_run)
            .with_converter("definitely-not-a-real-converter-binary");
        let downloader = TigerDownloader::with_fetcher(
            config,
            Box::new(CountingFetcher {
                fetches: fetches.clone(),
            }),
        )
        .unwrap();
        (downloader, fetches, temp_dir)
    }

    #[test]
    fn test_archive_basename() {
        assert_eq!(archive_basename(2014, "28", "place", "500k"), "cb_2014_28_place_500k");
        assert_eq!(
            BoundaryRequest::new(2016, "34", "puma10", "500k").basename(),
            "cb_2016_34_puma10_500k"
        );
    }

    #[test]
    fn test_paths_live_in_cache_dir() {
        let (downloader, _, temp_dir) = create_test_downloader(false);
        let request = BoundaryRequest::new(2015, "us", "county", "20m");

        assert_eq!(
            downloader.archive_path(&request),
            temp_dir.path().join("tiger").join("cb_2015_us_county_20m.zip")
        );
        assert_eq!(
            downloader.geojson_path(&request),
            temp_dir.path().join("tiger").join("cb_2015_us_county_20m.geojson")
        );
        assert!(temp_dir.path().join("tiger").is_dir());
    }

    #[test]
    fn test_dry_run_does_not_create_cache_dir() {
        let (_downloader, _, temp_dir) = create_test_downloader(true);
        assert!(!temp_dir.path().join("tiger").exists());
    }

    #[test]
    fn test_rejects_file_as_cache_dir() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, "x").unwrap();

        let result = TigerDownloader::with_fetcher(
            TigerConfig::new(&file),
            Box::new(CountingFetcher {
                fetches: Arc::new(AtomicUsize::new(0)),
            }),
        );
        assert!(matches!(
            result,
            Err(TigerError::Cache(CacheError::Configuration { .. }))
        ));
    }

    #[tokio::test]
    async fn test_fetch_skips_cached_archive() {
        let (downloader, fetches, _temp_dir) = create_test_downloader(false);
        let request = BoundaryRequest::new(2016, "us", "state", "20m");

        let first = downloader.fetch(&request, true).await.unwrap();
        let second = downloader.fetch(&request, true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        downloader.fetch(&request, false).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dry_run_performs_no_io() {
        let (downloader, fetches, _temp_dir) = create_test_downloader(true);
        let request = BoundaryRequest::new(2016, "us", "state", "20m");

        let table = downloader.query(&request, 0.0, true).await.unwrap();
        assert!(table.is_empty());
        assert!(downloader.list(2016).await.unwrap().is_empty());
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
        assert!(!downloader.archive_path(&request).exists());
    }

    #[tokio::test]
    async fn test_missing_converter_yields_empty_table() {
        let (downloader, _, _temp_dir) = create_test_downloader(false);
        let request = BoundaryRequest::new(2016, "us", "state", "20m");

        let table = downloader.query(&request, 0.0, true).await.unwrap();
        assert!(table.is_empty());
        assert!(!downloader.geojson_path(&request).exists());
    }

    #[tokio::test]
    async fn test_cached_geojson_skips_conversion() {
        let (downloader, _, _temp_dir) = create_test_downloader(false);
        let request = BoundaryRequest::new(2016, "us", "state", "20m");
        std::fs::write(
            downloader.geojson_path(&request),
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"GEOID":"06","NAME":"California"},"geometry":null}
            ]}"#,
        )
        .unwrap();

        let table = downloader.unpack(&request, 0.0, true).await.unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.column_names(), vec!["GEOID", "NAME", GEOMETRY_COLUMN]);
    }

    #[tokio::test]
    async fn test_list_delegates_to_fetcher() {
        let (downloader, _, _temp_dir) = create_test_downloader(false);
        assert_eq!(
            downloader.list(2016).await.unwrap(),
            vec!["cb_2016_us_state_20m.zip"]
        );
    }
}
