//! Census data API client
//!
//! Queries tabular data from `api.census.gov`, caching every result on disk
//! so repeated queries never hit the rate-limited API twice.
//!
//! Requires an API key to run queries; see
//! <https://api.census.gov/data/key_signup.html>.

mod client;
mod dataset;
mod response;

use thiserror::Error;

use crate::cache::CacheError;

pub use client::{CacheMode, CensusClient, QueryRequest, IDENTIFIER_FIELDS};
pub use dataset::{
    DatasetDescriptor, Distribution, GeographyLevel, GeographyMismatch, GeographyRules,
    VariableCatalog, VariableInfo,
};
pub use response::{check_response, rows_to_table};

/// Errors that can occur when talking to the Census API
#[derive(Debug, Error)]
pub enum CensusError {
    /// The client cannot be set up as configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTTP transport failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("Request failed [{status}] for [{url}]: {body}")]
    Status { status: u16, url: String, body: String },

    /// The request went through but the query failed
    #[error("Query failed [{message}]")]
    Api { message: String },

    /// The response body is not in the expected shape
    #[error("Malformed response from [{url}]: {reason}")]
    MalformedResponse { url: String, reason: String },

    /// No dataset identifier matches the configured name
    #[error("No dataset matching [{0}]")]
    DatasetNotFound(String),

    /// Reading or writing the cache failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A variable search pattern is not a valid regex
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl CensusError {
    /// True for transport failures and in-band query errors
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            CensusError::Request(_) | CensusError::Status { .. } | CensusError::Api { .. }
        )
    }

    /// True when the cache directory or client settings are unusable
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CensusError::Configuration(_) | CensusError::Cache(CacheError::Configuration { .. })
        )
    }
}
