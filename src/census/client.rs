//! Census API client with a persistent query cache

use std::collections::BTreeMap;

use regex::Regex;
use reqwest::Client;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use super::dataset::{GeographyDocument, VariablesDocument};
use super::{
    check_response, rows_to_table, CensusError, DatasetDescriptor, GeographyMismatch,
    GeographyRules, VariableCatalog, VariableInfo,
};
use crate::cache::{CacheLoad, MetadataCache, QueryCache, CREDENTIAL_PARAM};
use crate::config::CensusConfig;
use crate::data::{Column, Table};

/// Fields added to every query when the dataset knows them
pub const IDENTIFIER_FIELDS: [&str; 2] = ["GEOID", "NAME"];

/// How a query uses the result cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Return a cached result when present; cache fresh results
    #[default]
    ReadWrite,
    /// Always fetch, then replace the cached result
    Refresh,
    /// Neither read nor write the cache
    Off,
}

impl CacheMode {
    fn reads(self) -> bool {
        self == CacheMode::ReadWrite
    }

    fn writes(self) -> bool {
        self != CacheMode::Off
    }
}

/// A single data query
///
/// ```rust
/// # use censusbuddy::census::QueryRequest;
/// let request = QueryRequest::new(["DP04_0045E", "DP04_0045M"])
///     .for_geo("place", "*")
///     .within("state", "06")
///     .within("county", "037");
/// assert_eq!(request.filter.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Variables to fetch (the `get` clause)
    pub fields: Vec<String>,
    /// Geography level(s) to return (the `for` clause)
    pub filter: Vec<(String, String)>,
    /// Enclosing geographies that scope the filter (the `in` clause)
    pub qualifier: Vec<(String, String)>,
    /// Parameters passed through to the API verbatim
    pub extra: Vec<(String, String)>,
    pub cache_mode: CacheMode,
    /// Check the filter/qualifier pair against the dataset's geography rules
    pub check_geography: bool,
}

impl QueryRequest {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            check_geography: true,
            ..Default::default()
        }
    }

    /// Adds a `for` level, e.g. `("place", "*")`
    pub fn for_geo(mut self, level: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.push((level.into(), value.into()));
        self
    }

    /// Adds an `in` level, e.g. `("state", "06")`
    pub fn within(mut self, level: impl Into<String>, value: impl Into<String>) -> Self {
        self.qualifier.push((level.into(), value.into()));
        self
    }

    /// Adds a raw query parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }

    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub fn skip_geography_check(mut self) -> Self {
        self.check_geography = false;
        self
    }
}

/// Formats `[("state","06"),("county","037")]` as `state:06 county:037`
fn clause(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Client for one Census API dataset
///
/// Opening the client loads the dataset descriptor and variable catalog from
/// the cache directory, fetching and caching whichever is missing.
#[derive(Debug)]
pub struct CensusClient {
    http: Client,
    config: CensusConfig,
    cache: QueryCache,
    metadata: MetadataCache,
    dataset: DatasetDescriptor,
    variables: VariableCatalog,
    geography: Option<GeographyRules>,
}

impl CensusClient {
    /// Opens a client for `config.dataset`
    ///
    /// # Returns
    /// * `Ok(CensusClient)` - ready to query
    /// * `Err(CensusError::Cache)` - if the cache dir is invalid or its index is malformed
    /// * `Err(CensusError::DatasetNotFound)` - if discovery has no matching dataset
    /// * `Err(CensusError)` - if fetching metadata fails
    pub async fn open(config: CensusConfig) -> Result<Self, CensusError> {
        if config.dataset.trim().is_empty() {
            return Err(CensusError::Configuration(
                "must specify a dataset name".to_string(),
            ));
        }

        let cache = QueryCache::open(&config.cache_dir)?;
        let metadata = MetadataCache::new(&config.cache_dir);
        let http = Client::builder().timeout(config.timeout).build()?;

        let dataset = match metadata.read::<DatasetDescriptor>(&Self::dataset_key(&config.dataset)) {
            Some(cached) => {
                debug!(title = %cached.data.title, cached_at = %cached.cached_at, "dataset from cache");
                cached.data
            }
            None => {
                let dataset = fetch_dataset(&http, &config.discovery_url, &config.dataset).await?;
                metadata.write(&Self::dataset_key(&config.dataset), &dataset)?;
                dataset
            }
        };

        let variables = match metadata.read::<VariableCatalog>(&Self::vars_key(&config.dataset)) {
            Some(cached) => {
                debug!(count = cached.data.len(), cached_at = %cached.cached_at, "vars from cache");
                cached.data
            }
            None => {
                let variables = fetch_variables(&http, &dataset).await?;
                metadata.write(&Self::vars_key(&config.dataset), &variables)?;
                variables
            }
        };

        Ok(Self {
            http,
            config,
            cache,
            metadata,
            dataset,
            variables,
            geography: None,
        })
    }

    fn dataset_key(name: &str) -> String {
        format!("{}_dataset", name)
    }

    fn vars_key(name: &str) -> String {
        format!("{}_vars", name)
    }

    pub fn dataset(&self) -> &DatasetDescriptor {
        &self.dataset
    }

    pub fn variables(&self) -> &VariableCatalog {
        &self.variables
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Re-fetches the dataset descriptor and variable catalog
    pub async fn refresh_metadata(&mut self) -> Result<(), CensusError> {
        let name = self.config.dataset.clone();
        let dataset = fetch_dataset(&self.http, &self.config.discovery_url, &name).await?;
        let variables = fetch_variables(&self.http, &dataset).await?;
        self.metadata.write(&Self::dataset_key(&name), &dataset)?;
        self.metadata.write(&Self::vars_key(&name), &variables)?;
        self.dataset = dataset;
        self.variables = variables;
        self.geography = None;
        Ok(())
    }

    /// Finds variables whose name matches a regular expression
    pub fn search_vars(&self, pattern: &str) -> Result<Vec<String>, CensusError> {
        let re = Regex::new(pattern)?;
        Ok(self.variables.search(&re))
    }

    /// Gets catalog info for the given variables
    pub fn get_vars<S: AsRef<str>>(&self, ids: &[S]) -> BTreeMap<String, VariableInfo> {
        self.variables.select(ids)
    }

    /// Fetches the dataset's geography rules
    ///
    /// Lists, for each `for` level, the `in` combinations that can scope it.
    pub async fn geo_parameter_chart(&self) -> Result<GeographyRules, CensusError> {
        let url = &self.dataset.geography_link;
        let response = self.http.get(url).send().await?;
        let body = check_response(response).await?;
        let doc: GeographyDocument =
            serde_json::from_value(body).map_err(|e| CensusError::MalformedResponse {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        Ok(GeographyRules::from_document(doc))
    }

    async fn geography_rules(&mut self) -> Result<&GeographyRules, CensusError> {
        let rules = match self.geography.take() {
            Some(rules) => rules,
            None => self.geo_parameter_chart().await?,
        };
        Ok(self.geography.insert(rules))
    }

    /// Checks a request's `for`/`in` pair against the geography rules
    ///
    /// # Returns
    /// * `Ok(None)` - the combination is legal
    /// * `Ok(Some(mismatch))` - the combination is not supported, with alternatives
    pub async fn check_geography(
        &mut self,
        request: &QueryRequest,
    ) -> Result<Option<GeographyMismatch>, CensusError> {
        let filter: Vec<&str> = request.filter.iter().map(|(k, _)| k.as_str()).collect();
        let qualifier: Vec<&str> = request.qualifier.iter().map(|(k, _)| k.as_str()).collect();
        let rules = self.geography_rules().await?;
        Ok(rules.check(&filter, &qualifier).err())
    }

    /// Field list actually requested: the caller's fields plus any known
    /// identifier fields, sorted and de-duplicated
    pub fn normalized_fields(&self, fields: &[String]) -> Vec<String> {
        let mut out: Vec<String> = fields.to_vec();
        for id in IDENTIFIER_FIELDS {
            if !out.iter().any(|f| f == id) && self.variables.contains(id) {
                out.push(id.to_string());
            }
        }
        out.sort();
        out.dedup();
        out
    }

    /// Query parameters for a request, credential last
    pub fn build_params(&self, request: &QueryRequest) -> Vec<(String, String)> {
        let mut params = request.extra.clone();
        if !request.filter.is_empty() {
            params.push(("for".to_string(), clause(&request.filter)));
        }
        if !request.qualifier.is_empty() {
            params.push(("in".to_string(), clause(&request.qualifier)));
        }
        let fields = self.normalized_fields(&request.fields);
        params.push(("get".to_string(), fields.join(",")));
        params.push((CREDENTIAL_PARAM.to_string(), self.config.api_key.clone()));
        params
    }

    /// Queries the dataset
    ///
    /// A cached result for the same request is returned as stored. Otherwise
    /// the API is called, integer-typed variables are converted to numbers
    /// (columns that fail to convert stay textual) and the result is cached.
    ///
    /// When the geography check is enabled and the `for`/`in` pair is not
    /// legal for this dataset, the mismatch is logged with the valid
    /// alternatives and an empty table is returned.
    ///
    /// # Returns
    /// * `Ok(Table)` - the query result
    /// * `Err(CensusError)` - on transport failure, an in-band API error, or a cache failure
    pub async fn query(&mut self, request: &QueryRequest) -> Result<Table, CensusError> {
        let url = self
            .dataset
            .access_url()
            .ok_or_else(|| CensusError::MalformedResponse {
                url: self.dataset.identifier.clone(),
                reason: "dataset has no access URL".to_string(),
            })?
            .to_string();
        let fields = self.normalized_fields(&request.fields);
        let params = self.build_params(request);
        debug!(
            get = %fields.join(","),
            filter = %clause(&request.filter),
            qualifier = %clause(&request.qualifier),
            "query"
        );

        let key = self.cache.make_key(&url, &params)?;
        if request.cache_mode.reads() {
            if let CacheLoad::Hit { table, path } = self.cache.load(&key)? {
                info!(path = %path.display(), rows = table.num_rows(), "query results from cache");
                return Ok(table);
            }
        }

        if request.check_geography && !request.filter.is_empty() {
            if let Some(mismatch) = self.check_geography(request).await? {
                warn!(%mismatch, "geography check failed; returning empty result");
                return Ok(Table::default());
            }
        }

        let response = self.http.get(&url).query(&params).send().await?;
        let body = check_response(response).await?;
        debug!("query request ok");

        let mut table = match body {
            JsonValue::Null => Table::new(fields.iter().map(Column::text).collect()),
            body => rows_to_table(&url, &body)?,
        };

        // convert columns to numeric where indicated by the variable catalog
        for (name, info) in self.variables.select(&fields) {
            if !info.is_integer() {
                continue;
            }
            if let Err(e) = table.coerce_numeric(&name) {
                warn!(column = %e.column, value = %e.value, "can't convert column to numeric");
            }
        }

        if request.cache_mode.writes() {
            self.cache.save(&key, &table)?;
        }
        Ok(table)
    }
}

async fn fetch_dataset(
    http: &Client,
    discovery_url: &str,
    name: &str,
) -> Result<DatasetDescriptor, CensusError> {
    let response = http.get(discovery_url).send().await?;
    let body = check_response(response).await?;

    let datasets = body
        .get("dataset")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| CensusError::MalformedResponse {
            url: discovery_url.to_string(),
            reason: "missing dataset list".to_string(),
        })?;

    let entry = datasets
        .iter()
        .find(|d| {
            d.get("identifier")
                .and_then(JsonValue::as_str)
                .is_some_and(|id| id.contains(name))
        })
        .ok_or_else(|| CensusError::DatasetNotFound(name.to_string()))?;

    let dataset: DatasetDescriptor =
        serde_json::from_value(entry.clone()).map_err(|e| CensusError::MalformedResponse {
            url: discovery_url.to_string(),
            reason: e.to_string(),
        })?;
    info!(title = %dataset.title, "query dataset ok");
    Ok(dataset)
}

async fn fetch_variables(
    http: &Client,
    dataset: &DatasetDescriptor,
) -> Result<VariableCatalog, CensusError> {
    let url = &dataset.variables_link;
    let response = http.get(url).send().await?;
    let body = check_response(response).await?;
    let doc: VariablesDocument =
        serde_json::from_value(body).map_err(|e| CensusError::MalformedResponse {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    info!(count = doc.variables.len(), "query vars ok");
    Ok(doc.variables)
}
