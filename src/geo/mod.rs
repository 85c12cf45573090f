//! FIPS code and geographic entity reference lookups
//!
//! Resolves human-readable names ("calif", "los ang") to the FIPS codes the
//! Census API and TIGER files expect. A bundled subset of the Census
//! reference files ships with the crate; the full national files can be
//! loaded from a directory with [`GeoReference::from_dir`].

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

const XREF_FILE: &str = "geo_xref.csv";
const STATE_FILE: &str = "fips_state.csv";
const COUNTY_FILE: &str = "fips_county.csv";
const COUSUB_FILE: &str = "fips_cousub.csv";

const EMBEDDED_XREF: &str = include_str!("../../data/geo_xref.csv");
const EMBEDDED_STATES: &str = include_str!("../../data/fips_state.csv");
const EMBEDDED_COUNTIES: &str = include_str!("../../data/fips_county.csv");
const EMBEDDED_COUSUBS: &str = include_str!("../../data/fips_cousub.csv");

/// Errors from reference lookups
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Could not find {kind} matching [{key}]")]
    NotFound { kind: &'static str, key: String },

    #[error("Unknown FIPS code [{0}]")]
    UnknownFips(String),

    #[error("Invalid pattern [{pattern}]: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Failed to parse reference table [{name}]: {source}")]
    Table { name: String, source: csv::Error },

    #[error("Failed to read [{}]: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct XrefRow {
    tiger: String,
    census: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StateRow {
    #[serde(rename = "STATE")]
    fips: String,
    #[serde(rename = "STUSAB")]
    postal: String,
    #[serde(rename = "STATE_NAME")]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CountyRow {
    #[serde(rename = "STATEFP")]
    state_fips: String,
    #[serde(rename = "COUNTYFP")]
    county_fips: String,
    #[serde(rename = "COUNTYNAME")]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CousubRow {
    #[serde(rename = "STATEFP")]
    state_fips: String,
    #[serde(rename = "COUNTYFP")]
    county_fips: String,
    #[serde(rename = "COUSUBFP")]
    cousub_fips: String,
    #[serde(rename = "COUSUBNAME")]
    name: String,
}

/// Read-only reference tables, built once and passed by reference
#[derive(Debug, Clone)]
pub struct GeoReference {
    xref: Vec<XrefRow>,
    states: Vec<StateRow>,
    counties: Vec<CountyRow>,
    cousubs: Vec<CousubRow>,
}

impl GeoReference {
    /// Loads the reference tables bundled with the crate
    ///
    /// The bundled county and county subdivision tables are a subset; use
    /// [`GeoReference::from_dir`] for national coverage.
    pub fn embedded() -> Result<Self, LookupError> {
        Ok(Self {
            xref: parse(XREF_FILE, EMBEDDED_XREF.as_bytes())?,
            states: parse(STATE_FILE, EMBEDDED_STATES.as_bytes())?,
            counties: parse(COUNTY_FILE, EMBEDDED_COUNTIES.as_bytes())?,
            cousubs: parse(COUSUB_FILE, EMBEDDED_COUSUBS.as_bytes())?,
        })
    }

    /// Loads reference tables from `dir`
    ///
    /// Expects `geo_xref.csv`, `fips_state.csv`, `fips_county.csv` and
    /// `fips_cousub.csv`, comma-separated with the Census column names.
    pub fn from_dir(dir: &Path) -> Result<Self, LookupError> {
        Ok(Self {
            xref: load(dir, XREF_FILE)?,
            states: load(dir, STATE_FILE)?,
            counties: load(dir, COUNTY_FILE)?,
            cousubs: load(dir, COUSUB_FILE)?,
        })
    }

    /// Maps a TIGER entity code to the Census API geography name
    ///
    /// # Example
    /// `"cbsa"` maps to `"metropolitan statistical area/micropolitan statistical area"`.
    pub fn entity_to_census(&self, entity: &str) -> Result<&str, LookupError> {
        self.xref
            .iter()
            .find(|row| row.tiger == entity)
            .map(|row| row.census.as_str())
            .ok_or_else(|| LookupError::NotFound {
                kind: "entity",
                key: entity.to_string(),
            })
    }

    /// Finds a state FIPS code by postal code, FIPS code or name pattern
    ///
    /// # Arguments
    /// * `pattern` - case-insensitive regex matched at the start of each field
    ///
    /// # Returns
    /// * `Ok(&str)` - two-digit FIPS code of the first matching state
    /// * `Err(LookupError::NotFound)` - if no state matches
    pub fn state_fips(&self, pattern: &str) -> Result<&str, LookupError> {
        let re = anchored(pattern)?;
        let matches: Vec<&StateRow> = self
            .states
            .iter()
            .filter(|row| re.is_match(&row.postal) || re.is_match(&row.fips) || re.is_match(&row.name))
            .collect();

        first_match("state", pattern, &matches, |row| row.name.as_str()).map(|row| row.fips.as_str())
    }

    /// Returns the postal code for a state FIPS code
    pub fn fips_state(&self, fips: &str) -> Result<&str, LookupError> {
        self.states
            .iter()
            .find(|row| row.fips == fips)
            .map(|row| row.postal.as_str())
            .ok_or_else(|| LookupError::UnknownFips(fips.to_string()))
    }

    /// Finds a county FIPS code within a state
    ///
    /// # Arguments
    /// * `state` - state FIPS code or postal code
    /// * `pattern` - county code or name pattern (e.g. "037" or "los ang")
    pub fn county_fips(&self, state: &str, pattern: &str) -> Result<&str, LookupError> {
        let state = self.resolve_state(state)?;
        let re = anchored(pattern)?;
        let matches: Vec<&CountyRow> = self
            .counties
            .iter()
            .filter(|row| {
                row.state_fips == state.fips
                    && (re.is_match(&row.county_fips) || re.is_match(&row.name))
            })
            .collect();

        first_match("county", pattern, &matches, |row| row.name.as_str()).map(|row| row.county_fips.as_str())
    }

    /// Finds a county subdivision FIPS code within a county
    ///
    /// # Arguments
    /// * `state` - state FIPS code or postal code
    /// * `county` - county FIPS code; unpadded codes like `37` are accepted
    /// * `pattern` - subdivision code or name pattern
    pub fn cousub_fips(
        &self,
        state: &str,
        county: &str,
        pattern: &str,
    ) -> Result<&str, LookupError> {
        let state = self.resolve_state(state)?;
        let county = pad_county(county);
        let re = anchored(pattern)?;
        let matches: Vec<&CousubRow> = self
            .cousubs
            .iter()
            .filter(|row| {
                row.state_fips == state.fips
                    && row.county_fips == county
                    && (re.is_match(&row.cousub_fips) || re.is_match(&row.name))
            })
            .collect();

        first_match("county subdivision", pattern, &matches, |row| row.name.as_str())
            .map(|row| row.cousub_fips.as_str())
    }

    fn resolve_state(&self, state: &str) -> Result<&StateRow, LookupError> {
        self.states
            .iter()
            .find(|row| row.fips == state || row.postal.eq_ignore_ascii_case(state))
            .ok_or_else(|| LookupError::NotFound {
                kind: "state",
                key: state.to_string(),
            })
    }
}

fn anchored(pattern: &str) -> Result<Regex, LookupError> {
    RegexBuilder::new(&format!("^(?:{pattern})"))
        .case_insensitive(true)
        .build()
        .map_err(|source| LookupError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Picks the first match, warning when the pattern is ambiguous
fn first_match<'a, T>(
    kind: &'static str,
    pattern: &str,
    matches: &[&'a T],
    name: impl Fn(&T) -> &str,
) -> Result<&'a T, LookupError> {
    if matches.len() > 1 {
        let candidates: Vec<&str> = matches.iter().map(|row| name(*row)).collect();
        tracing::warn!(kind, pattern, ?candidates, "multiple matches, using the first");
    }
    matches.first().copied().ok_or_else(|| LookupError::NotFound {
        kind,
        key: pattern.to_string(),
    })
}

fn pad_county(county: &str) -> String {
    if !county.is_empty() && county.len() < 3 && county.chars().all(|c| c.is_ascii_digit()) {
        format!("{county:0>3}")
    } else {
        county.to_string()
    }
}

fn parse<T: DeserializeOwned, R: Read>(name: &str, reader: R) -> Result<Vec<T>, LookupError> {
    csv::Reader::from_reader(reader)
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| LookupError::Table {
            name: name.to_string(),
            source,
        })
}

fn load<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Vec<T>, LookupError> {
    let path = dir.join(name);
    let file = File::open(&path).map_err(|source| LookupError::Io {
        path: path.clone(),
        source,
    })?;
    parse(name, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn reference() -> GeoReference {
        GeoReference::embedded().unwrap()
    }

    #[test]
    fn test_state_fips_by_postal_fips_and_name() {
        let geo = reference();
        assert_eq!(geo.state_fips("CA").unwrap(), "06");
        assert_eq!(geo.state_fips("06").unwrap(), "06");
        assert_eq!(geo.state_fips("calif").unwrap(), "06");
        assert_eq!(geo.state_fips("u.s. virgin").unwrap(), "78");
    }

    #[test]
    fn test_state_fips_is_anchored_at_start() {
        let geo = reference();
        let err = geo.state_fips("liforn").unwrap_err();
        assert!(matches!(err, LookupError::NotFound { kind: "state", .. }));
    }

    #[test]
    fn test_state_fips_ambiguous_takes_first() {
        // "new" matches several states; the first in table order wins
        assert_eq!(reference().state_fips("new").unwrap(), "33");
    }

    #[test]
    fn test_state_fips_invalid_pattern() {
        let err = reference().state_fips("(").unwrap_err();
        assert!(matches!(err, LookupError::InvalidPattern { .. }));
    }

    #[test]
    fn test_fips_state() {
        let geo = reference();
        assert_eq!(geo.fips_state("01").unwrap(), "AL");
        assert_eq!(geo.fips_state("06").unwrap(), "CA");
        assert_eq!(geo.fips_state("78").unwrap(), "VI");
        assert!(matches!(geo.fips_state("00"), Err(LookupError::UnknownFips(_))));
    }

    #[test]
    fn test_county_fips() {
        let geo = reference();
        assert_eq!(geo.county_fips("06", "los ang").unwrap(), "037");
        assert_eq!(geo.county_fips("CA", "Los Angeles").unwrap(), "037");
        assert_eq!(geo.county_fips("ca", "san fran").unwrap(), "075");
    }

    #[test]
    fn test_county_fips_matches_code() {
        let geo = reference();
        assert_eq!(geo.county_fips("06", "037").unwrap(), "037");
        assert_eq!(geo.county_fips("CA", "075").unwrap(), "075");
        assert_eq!(geo.county_fips("NE", "071").unwrap(), "071");
    }

    #[test]
    fn test_county_fips_requires_code_for_state() {
        let err = reference().county_fips("California", "Los Angeles").unwrap_err();
        assert!(matches!(err, LookupError::NotFound { kind: "state", .. }));
    }

    #[test]
    fn test_county_fips_scoped_to_state() {
        let err = reference().county_fips("NE", "los ang").unwrap_err();
        assert!(matches!(err, LookupError::NotFound { kind: "county", .. }));
    }

    #[test]
    fn test_cousub_fips_pads_county() {
        let geo = reference();
        assert_eq!(geo.cousub_fips("06", "037", "san fern").unwrap(), "92785");
        assert_eq!(geo.cousub_fips("CA", "37", "san fern").unwrap(), "92785");
    }

    #[test]
    fn test_cousub_fips_matches_code() {
        let geo = reference();
        assert_eq!(geo.cousub_fips("06", "037", "92785").unwrap(), "92785");
        assert!(geo.cousub_fips("06", "not a county", "san fern").is_err());
    }

    #[test]
    fn test_entity_to_census() {
        let geo = reference();
        assert_eq!(
            geo.entity_to_census("cbsa").unwrap(),
            "metropolitan statistical area/micropolitan statistical area"
        );
        assert_eq!(geo.entity_to_census("subbarrio").unwrap(), "subminor civil division");
        assert!(geo.entity_to_census("nope").is_err());
    }

    #[test]
    fn test_pad_county() {
        assert_eq!(pad_county("37"), "037");
        assert_eq!(pad_county("7"), "007");
        assert_eq!(pad_county("037"), "037");
        assert_eq!(pad_county("*"), "*");
    }

    #[test]
    fn test_from_dir_loads_tables() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(XREF_FILE), "tiger,census\nstate,state\n").unwrap();
        fs::write(dir.path().join(STATE_FILE), "STATE,STUSAB,STATE_NAME,STATENS\n32,NV,Nevada,01779793\n").unwrap();
        fs::write(
            dir.path().join(COUNTY_FILE),
            "STATE,STATEFP,COUNTYFP,COUNTYNAME,CLASSFP\nNV,32,003,Clark County,H1\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(COUSUB_FILE),
            "STATE,STATEFP,COUNTYFP,COUNTYNAME,COUSUBFP,COUSUBNAME,FUNCSTAT\n",
        )
        .unwrap();

        let geo = GeoReference::from_dir(dir.path()).unwrap();
        assert_eq!(geo.state_fips("nev").unwrap(), "32");
        assert_eq!(geo.county_fips("NV", "clark").unwrap(), "003");
        assert!(geo.cousub_fips("NV", "3", "x").is_err());
    }

    #[test]
    fn test_from_dir_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = GeoReference::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, LookupError::Io { .. }));
    }
}
