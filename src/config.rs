//! Client configuration
//!
//! Cache locations default to the XDG cache directory
//! (`~/.cache/censusbuddy/` on Linux), with separate `census/` and `tiger/`
//! subdirectories.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

/// Dataset discovery document listing every Census API dataset
pub const CENSUS_DISCOVERY_URL: &str = "https://api.census.gov/data.json";

/// HTTP root of the TIGER cartographic boundary files
pub const TIGER_HTTP_BASE: &str = "https://www2.census.gov";

/// FTP host serving the same files
pub const TIGER_FTP_HOST: &str = "ftp2.census.gov";

/// External tool used to convert shapefiles to GeoJSON
pub const DEFAULT_CONVERTER: &str = "ogr2ogr";

/// Timeout applied to every network request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Returns the platform cache directory for this tool
///
/// Returns `None` if it cannot be determined (e.g., no home directory).
pub fn default_cache_root() -> Option<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "censusbuddy")?;
    Some(project_dirs.cache_dir().to_path_buf())
}

/// Configuration for [`crate::census::CensusClient`]
#[derive(Debug, Clone)]
pub struct CensusConfig {
    /// Directory holding the query index, result files and metadata
    pub cache_dir: PathBuf,
    /// Dataset name matched against dataset identifiers (e.g. "ACSProfile5Y2015")
    pub dataset: String,
    /// API credential, sent as the `key` parameter
    pub api_key: String,
    /// Dataset discovery document
    pub discovery_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl CensusConfig {
    /// Creates a config with default discovery URL and timeout
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        dataset: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            dataset: dataset.into(),
            api_key: api_key.into(),
            discovery_url: CENSUS_DISCOVERY_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the discovery document URL
    pub fn with_discovery_url(mut self, url: impl Into<String>) -> Self {
        self.discovery_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How boundary archives are downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Http,
    Ftp,
}

/// Configuration for [`crate::tiger::TigerDownloader`]
#[derive(Debug, Clone)]
pub struct TigerConfig {
    /// Directory holding downloaded archives and converted GeoJSON
    pub cache_dir: PathBuf,
    pub transport: Transport,
    /// HTTP root (scheme and host)
    pub http_base: String,
    /// FTP host name
    pub ftp_host: String,
    /// Name or path of the shapefile converter
    pub converter: String,
    /// Compute names and paths without touching the network
    pub dry_run: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl TigerConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            transport: Transport::default(),
            http_base: TIGER_HTTP_BASE.to_string(),
            ftp_host: TIGER_FTP_HOST.to_string(),
            converter: DEFAULT_CONVERTER.to_string(),
            dry_run: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_http_base(mut self, base: impl Into<String>) -> Self {
        self.http_base = base.into();
        self
    }

    pub fn with_converter(mut self, converter: impl Into<String>) -> Self {
        self.converter = converter.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
