//! Dataset descriptors, variable catalogs and geography rules
//!
//! These mirror the JSON documents published by the Census API:
//! `data.json` (dataset discovery), `variables.json` and `geography.json`.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One entry of the dataset discovery document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    #[serde(default)]
    pub title: String,
    pub identifier: String,
    #[serde(default)]
    pub distribution: Vec<Distribution>,
    #[serde(rename = "c_variablesLink")]
    pub variables_link: String,
    #[serde(rename = "c_geographyLink")]
    pub geography_link: String,
    /// Fields this client does not interpret, kept so the cached copy is complete
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl DatasetDescriptor {
    /// Query endpoint of the dataset
    pub fn access_url(&self) -> Option<&str> {
        self.distribution.first().map(|d| d.access_url.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    #[serde(rename = "accessURL")]
    pub access_url: String,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Metadata for one queryable variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    #[serde(
        rename = "predicateType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub predicate_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl VariableInfo {
    /// True when the API documents the variable as integer-valued
    pub fn is_integer(&self) -> bool {
        self.predicate_type.as_deref() == Some("int")
    }
}

/// All variables of a dataset, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableCatalog {
    variables: BTreeMap<String, VariableInfo>,
}

impl VariableCatalog {
    pub fn new(variables: BTreeMap<String, VariableInfo>) -> Self {
        Self { variables }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.get(name)
    }

    /// Variable names matching `pattern` anywhere in the name, sorted
    pub fn search(&self, pattern: &Regex) -> Vec<String> {
        self.variables
            .keys()
            .filter(|name| pattern.is_match(name))
            .cloned()
            .collect()
    }

    /// Catalog entries for the given names; unknown names are skipped
    pub fn select<S: AsRef<str>>(&self, ids: &[S]) -> BTreeMap<String, VariableInfo> {
        ids.iter()
            .filter_map(|id| {
                self.variables
                    .get_key_value(id.as_ref())
                    .map(|(k, v)| (k.clone(), v.clone()))
            })
            .collect()
    }
}

/// Body of a dataset's `variables.json`
#[derive(Debug, Deserialize)]
pub(crate) struct VariablesDocument {
    pub variables: VariableCatalog,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeographyDocument {
    pub fips: Vec<GeographyEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeographyEntry {
    pub name: String,
    #[serde(rename = "geoLevelId")]
    pub geo_level_id: String,
    #[serde(default)]
    pub requires: Option<Vec<String>>,
}

/// A geography level and the qualifier combinations that can scope it
#[derive(Debug, Clone, PartialEq)]
pub struct GeographyLevel {
    pub name: String,
    /// Each entry is one legal set of `in` levels (empty = none required)
    pub requires: Vec<Vec<String>>,
}

/// Which `in` clauses are legal for which `for` levels
///
/// Levels are ordered by summary level id, which comes out close to the
/// geographic hierarchy (nation, region, division, state, county, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeographyRules {
    levels: Vec<GeographyLevel>,
}

impl GeographyRules {
    pub(crate) fn from_document(doc: GeographyDocument) -> Self {
        // Later duplicates of an id replace earlier ones
        let by_id: BTreeMap<String, GeographyEntry> = doc
            .fips
            .into_iter()
            .map(|entry| (entry.geo_level_id.clone(), entry))
            .collect();

        let mut levels: Vec<GeographyLevel> = Vec::new();
        for entry in by_id.into_values() {
            let requires = entry.requires.unwrap_or_default();
            match levels.iter_mut().find(|l| l.name == entry.name) {
                Some(level) => level.requires.push(requires),
                None => levels.push(GeographyLevel {
                    name: entry.name,
                    requires: vec![requires],
                }),
            }
        }
        Self { levels }
    }

    pub fn levels(&self) -> &[GeographyLevel] {
        &self.levels
    }

    pub fn get(&self, name: &str) -> Option<&GeographyLevel> {
        self.levels.iter().find(|l| l.name == name)
    }

    /// Checks that `qualifier` is a legal `in` clause for each `filter` level
    ///
    /// A qualifier is legal when its set of levels equals one of the
    /// combinations listed for the filter level.
    pub fn check<S: AsRef<str>>(
        &self,
        filter: &[S],
        qualifier: &[S],
    ) -> Result<(), GeographyMismatch> {
        let mut given: Vec<String> = qualifier.iter().map(|q| q.as_ref().to_string()).collect();
        given.sort();
        given.dedup();

        for level_name in filter {
            let level_name = level_name.as_ref();
            let Some(level) = self.get(level_name) else {
                return Err(GeographyMismatch::UnknownLevel {
                    level: level_name.to_string(),
                    known: self.levels.iter().map(|l| l.name.clone()).collect(),
                });
            };

            let legal = level.requires.iter().any(|combo| {
                let mut combo = combo.clone();
                combo.sort();
                combo.dedup();
                combo == given
            });
            if !legal {
                return Err(GeographyMismatch::Qualifier {
                    level: level_name.to_string(),
                    given,
                    allowed: level.requires.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A `for`/`in` combination the dataset does not support
#[derive(Debug, Clone, PartialEq)]
pub enum GeographyMismatch {
    /// The `for` level does not exist in this dataset
    UnknownLevel { level: String, known: Vec<String> },
    /// The `in` levels are not a legal combination for the `for` level
    Qualifier {
        level: String,
        given: Vec<String>,
        allowed: Vec<Vec<String>>,
    },
}

impl fmt::Display for GeographyMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeographyMismatch::UnknownLevel { level, known } => write!(
                f,
                "unknown geography level [{}]; known levels: [{}]",
                level,
                known.join(", ")
            ),
            GeographyMismatch::Qualifier {
                level,
                given,
                allowed,
            } => {
                let allowed: Vec<String> = allowed
                    .iter()
                    .map(|combo| format!("[{}]", combo.join(" ")))
                    .collect();
                write!(
                    f,
                    "invalid qualifier [{}] for level [{}]; valid qualifiers: {}",
                    given.join(" "),
                    level,
                    allowed.join(", ")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rules() -> GeographyRules {
        let doc: GeographyDocument = serde_json::from_value(serde_json::json!({
            "fips": [
                {"name": "county", "geoLevelId": "050", "requires": ["state"], "wildcard": ["state"]},
                {"name": "us", "geoLevelId": "010"},
                {"name": "place", "geoLevelId": "160", "requires": ["state"]},
                {"name": "state", "geoLevelId": "040"},
                {"name": "county subdivision", "geoLevelId": "060", "requires": ["state", "county"]},
                {"name": "place", "geoLevelId": "155", "requires": ["state", "county"]}
            ]
        }))
        .unwrap();
        GeographyRules::from_document(doc)
    }

    #[test]
    fn test_rules_ordered_by_level_id_and_grouped_by_name() {
        let rules = sample_rules();
        let names: Vec<&str> = rules.levels().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["us", "state", "county", "county subdivision", "place"]);

        let place = rules.get("place").unwrap();
        assert_eq!(
            place.requires,
            vec![
                vec!["state".to_string(), "county".to_string()],
                vec!["state".to_string()]
            ]
        );
        assert_eq!(rules.get("state").unwrap().requires, vec![Vec::<String>::new()]);
    }

    #[test]
    fn test_check_accepts_legal_qualifier_in_any_order() {
        let rules = sample_rules();
        assert!(rules.check(&["place"], &["state"]).is_ok());
        assert!(rules.check(&["county subdivision"], &["county", "state"]).is_ok());
        assert!(rules.check(&["state"], &[] as &[&str]).is_ok());
    }

    #[test]
    fn test_check_reports_allowed_alternatives() {
        let rules = sample_rules();
        let err = rules.check(&["county"], &["place"]).unwrap_err();

        match &err {
            GeographyMismatch::Qualifier { level, allowed, .. } => {
                assert_eq!(level, "county");
                assert_eq!(allowed, &vec![vec!["state".to_string()]]);
            }
            other => panic!("unexpected mismatch: {:?}", other),
        }
        assert!(err.to_string().contains("valid qualifiers: [state]"));
    }

    #[test]
    fn test_check_unknown_level() {
        let rules = sample_rules();
        let err = rules.check(&["galaxy"], &[] as &[&str]).unwrap_err();
        assert!(matches!(err, GeographyMismatch::UnknownLevel { .. }));
        assert!(err.to_string().contains("county subdivision"));
    }

    #[test]
    fn test_descriptor_parses_discovery_entry() {
        let descriptor: DatasetDescriptor = serde_json::from_value(serde_json::json!({
            "title": "ACS 5-Year Data Profiles",
            "identifier": "https://api.census.gov/data/id/ACSProfile5Y2015",
            "distribution": [{"accessURL": "https://api.census.gov/data/2015/acs5/profile", "format": "API"}],
            "c_variablesLink": "https://api.census.gov/data/2015/acs5/profile/variables.json",
            "c_geographyLink": "https://api.census.gov/data/2015/acs5/profile/geography.json",
            "c_vintage": 2015
        }))
        .unwrap();

        assert_eq!(
            descriptor.access_url(),
            Some("https://api.census.gov/data/2015/acs5/profile")
        );
        assert_eq!(descriptor.extra.get("c_vintage"), Some(&serde_json::json!(2015)));

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["c_vintage"], 2015);
        assert_eq!(json["distribution"][0]["format"], "API");
    }

    #[test]
    fn test_catalog_search_and_select() {
        let doc: VariablesDocument = serde_json::from_value(serde_json::json!({
            "variables": {
                "NAME": {"label": "Geographic Area Name", "predicateType": "string"},
                "DP05_0001E": {"label": "Total population", "predicateType": "int"},
                "DP05_0001M": {"label": "Margin of error", "predicateType": "int"},
                "for": {"label": "Census API FIPS 'for' clause"}
            }
        }))
        .unwrap();
        let catalog = doc.variables;

        let re = Regex::new("^DP05").unwrap();
        assert_eq!(catalog.search(&re), vec!["DP05_0001E", "DP05_0001M"]);

        let selected = catalog.select(&["NAME", "DP05_0001E", "BOGUS"]);
        assert_eq!(selected.len(), 2);
        assert!(selected["DP05_0001E"].is_integer());
        assert!(!selected["NAME"].is_integer());
        assert!(!catalog.get("for").unwrap().is_integer());
    }
}
