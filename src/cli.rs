//! Command-line interface parsing for censusbuddy
//!
//! Handles parsing of CLI arguments using clap and turns them into the
//! library's request and configuration types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::census::{CacheMode, QueryRequest};
use crate::config::{default_cache_root, CensusConfig, TigerConfig, Transport};
use crate::tiger::BoundaryRequest;

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// A `--for`/`--in` value is not `level:value`
    #[error("Invalid geography '{0}'. Expected level:value, e.g. state:06")]
    InvalidGeography(String),

    /// Queries need a Census API key
    #[error("Missing API key. Pass --api-key or set CENSUS_API_KEY")]
    MissingApiKey,

    /// No cache directory was given and none could be determined
    #[error("Cannot determine a cache directory. Pass --cache-dir")]
    NoCacheDir,
}

/// censusbuddy - cached access to Census data and boundary files
#[derive(Parser, Debug)]
#[command(name = "censusbuddy")]
#[command(about = "Cached Census API queries and TIGER boundary downloads")]
#[command(version)]
pub struct Cli {
    /// Cache root; `census/` and `tiger/` are created beneath it
    #[arg(long, env = "CENSUSBUDDY_CACHE_DIR", global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Census API key
    #[arg(long, env = "CENSUS_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Network timeout in seconds
    #[arg(long, global = true, default_value_t = 60, value_name = "SECS")]
    pub timeout_secs: u64,

    /// Log debug output to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Query a dataset and print the result as CSV
    ///
    /// Example:
    ///   censusbuddy query --dataset ACSProfile5Y2015 --get DP04_0045E,DP04_0045M \
    ///     --for place:* --in state:06
    Query(QueryArgs),

    /// List or search a dataset's variables
    Vars(VarsArgs),

    /// Print the geography levels a dataset supports
    Geography(DatasetArg),

    /// Download a boundary file and print its features as CSV
    Tiger(TigerArgs),

    /// List the boundary archives published for a year
    TigerList {
        year: u16,

        /// Use anonymous FTP instead of HTTPS
        #[arg(long)]
        ftp: bool,
    },

    /// Look up FIPS codes
    ///
    /// The bundled tables cover every state, the counties of California and
    /// a single county subdivision. Pass --reference-dir with the national
    /// Census reference files for complete county and subdivision lookups.
    Fips {
        /// Directory with full Census reference files (defaults to the bundled subset)
        #[arg(long, value_name = "DIR")]
        reference_dir: Option<PathBuf>,

        #[command(subcommand)]
        lookup: FipsCommand,
    },
}

#[derive(Args, Debug)]
pub struct DatasetArg {
    /// Dataset name, matched against dataset identifiers
    #[arg(long, short)]
    pub dataset: String,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub dataset: DatasetArg,

    /// Variables to fetch, comma separated
    #[arg(long = "get", required = true, value_delimiter = ',', value_name = "VARS")]
    pub fields: Vec<String>,

    /// Geography level to return, as level:value (repeatable)
    #[arg(long = "for", value_parser = parse_geo_pair, value_name = "LEVEL:VALUE")]
    pub filter: Vec<(String, String)>,

    /// Enclosing geography, as level:value (repeatable)
    #[arg(long = "in", value_parser = parse_geo_pair, value_name = "LEVEL:VALUE")]
    pub qualifier: Vec<(String, String)>,

    /// Ignore any cached result and replace it
    #[arg(long, conflicts_with = "no_cache")]
    pub refresh: bool,

    /// Neither read nor write the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Skip the geography level check
    #[arg(long)]
    pub no_geo_check: bool,
}

#[derive(Args, Debug)]
pub struct VarsArgs {
    #[command(flatten)]
    pub dataset: DatasetArg,

    /// Regex matched against variable names
    #[arg(long, short)]
    pub search: Option<String>,

    /// Variable names to describe
    pub ids: Vec<String>,

    /// Re-fetch the dataset descriptor and variable catalog first
    #[arg(long)]
    pub refresh_metadata: bool,
}

#[derive(Args, Debug)]
pub struct TigerArgs {
    pub year: u16,

    /// State FIPS code, or `us`
    pub region: String,

    /// Entity type, e.g. state, county, place
    pub entity: String,

    /// Resolution: 500k, 5m or 20m
    #[arg(default_value = "500k")]
    pub resolution: String,

    /// ogr2ogr simplification tolerance (0 disables)
    #[arg(long, default_value_t = 0.0)]
    pub simplify: f64,

    /// Use anonymous FTP instead of HTTPS
    #[arg(long)]
    pub ftp: bool,

    /// Re-download and re-convert even if cached
    #[arg(long)]
    pub no_cache: bool,

    /// Compute file names without downloading or converting
    #[arg(long)]
    pub dry_run: bool,

    /// Shapefile converter to run
    #[arg(long, default_value = crate::config::DEFAULT_CONVERTER)]
    pub converter: String,
}

#[derive(Subcommand, Debug)]
pub enum FipsCommand {
    /// State FIPS code from a postal code, code or name pattern
    State {
        pattern: String,

        /// Treat the argument as a FIPS code and print its postal code
        #[arg(long)]
        reverse: bool,
    },

    /// County FIPS code within a state
    County { state: String, pattern: String },

    /// County subdivision FIPS code within a county (needs --reference-dir for most counties)
    Cousub {
        state: String,
        county: String,
        pattern: String,
    },

    /// Census geography name for a TIGER entity code
    Entity { entity: String },
}

/// Parses `level:value`; the value may itself contain colons
pub fn parse_geo_pair(s: &str) -> Result<(String, String), CliError> {
    match s.split_once(':') {
        Some((level, value)) if !level.trim().is_empty() && !value.trim().is_empty() => {
            Ok((level.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(CliError::InvalidGeography(s.to_string())),
    }
}

impl Cli {
    /// Cache root from `--cache-dir` or the platform default
    pub fn cache_root(&self) -> Result<PathBuf, CliError> {
        self.cache_dir
            .clone()
            .or_else(default_cache_root)
            .ok_or(CliError::NoCacheDir)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Client configuration for `dataset`
    ///
    /// # Arguments
    /// * `require_key` - fail with `CliError::MissingApiKey` when no key is set
    pub fn census_config(&self, dataset: &str, require_key: bool) -> Result<CensusConfig, CliError> {
        let api_key = match (&self.api_key, require_key) {
            (Some(key), _) => key.clone(),
            (None, true) => return Err(CliError::MissingApiKey),
            (None, false) => String::new(),
        };
        Ok(CensusConfig::new(self.cache_root()?.join("census"), dataset, api_key)
            .with_timeout(self.timeout()))
    }

    /// Downloader configuration
    pub fn tiger_config(&self, ftp: bool) -> Result<TigerConfig, CliError> {
        let transport = if ftp { Transport::Ftp } else { Transport::Http };
        Ok(TigerConfig::new(self.cache_root()?.join("tiger"))
            .with_transport(transport)
            .with_timeout(self.timeout()))
    }
}

impl QueryArgs {
    /// Builds the library request from parsed arguments
    pub fn to_request(&self) -> QueryRequest {
        let mode = if self.no_cache {
            CacheMode::Off
        } else if self.refresh {
            CacheMode::Refresh
        } else {
            CacheMode::ReadWrite
        };

        let mut request = QueryRequest::new(self.fields.iter().cloned()).cache_mode(mode);
        for (level, value) in &self.filter {
            request = request.for_geo(level, value);
        }
        for (level, value) in &self.qualifier {
            request = request.within(level, value);
        }
        if self.no_geo_check {
            request = request.skip_geography_check();
        }
        request
    }
}

impl TigerArgs {
    pub fn to_request(&self) -> BoundaryRequest {
        BoundaryRequest::new(self.year, &self.region, &self.entity, &self.resolution)
    }
}
