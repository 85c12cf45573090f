//! Cache key construction
//!
//! A cache key is the request URL with its query string rebuilt in a
//! canonical form: credential removed, parameters sorted, form-urlencoded.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::CacheError;

/// Name of the query parameter carrying the API credential
///
/// It is sent on every request but never becomes part of a cache key.
pub const CREDENTIAL_PARAM: &str = "key";

/// Normalized request signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the cache key for a request
///
/// Parameters are sorted by name (then value, so repeated names are stable)
/// and the credential parameter is dropped, so two requests that differ only
/// in parameter order or API key map to the same key.
///
/// # Arguments
/// * `base_url` - Request URL without the query string
/// * `params` - Query parameters in any order
///
/// # Returns
/// * `Ok(CacheKey)` - the canonical URL
/// * `Err(CacheError::Key)` - if `base_url` is not a valid absolute URL
pub fn make_key<K, V>(base_url: &str, params: &[(K, V)]) -> Result<CacheKey, CacheError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = Url::parse(base_url).map_err(|source| CacheError::Key {
        url: base_url.to_string(),
        source,
    })?;

    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .filter(|(k, _)| *k != CREDENTIAL_PARAM)
        .collect();
    pairs.sort();

    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }

    Ok(CacheKey(url.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://api.census.gov/data/2015/acs5/profile";

    #[test]
    fn test_make_key_sorts_and_encodes() {
        let key = make_key(
            URL,
            &[("get", "NAME,DP05_0001E"), ("for", "place:*"), ("in", "state:06")],
        )
        .unwrap();

        assert_eq!(
            key.as_str(),
            "https://api.census.gov/data/2015/acs5/profile?for=place%3A*&get=NAME%2CDP05_0001E&in=state%3A06"
        );
    }

    #[test]
    fn test_make_key_ignores_parameter_order() {
        let a = make_key(URL, &[("get", "X"), ("for", "state:*"), ("key", "abc")]).unwrap();
        let b = make_key(URL, &[("key", "abc"), ("for", "state:*"), ("get", "X")]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_make_key_excludes_credential() {
        let a = make_key(URL, &[("get", "X"), ("key", "first-secret")]).unwrap();
        let b = make_key(URL, &[("get", "X"), ("key", "second-secret")]).unwrap();
        let c = make_key(URL, &[("get", "X")]).unwrap();

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(!a.as_str().contains("secret"));
    }

    #[test]
    fn test_make_key_distinguishes_parameter_values() {
        let a = make_key(URL, &[("for", "state:06")]).unwrap();
        let b = make_key(URL, &[("for", "state:41")]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_make_key_repeated_names_are_stable() {
        let a = make_key(URL, &[("in", "state:06"), ("in", "county:037")]).unwrap();
        let b = make_key(URL, &[("in", "county:037"), ("in", "state:06")]).unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().ends_with("?in=county%3A037&in=state%3A06"));
    }

    #[test]
    fn test_make_key_without_params_has_no_query() {
        let key = make_key(URL, &[("key", "secret")] as &[(&str, &str)]).unwrap();
        assert_eq!(key.as_str(), URL);
    }

    #[test]
    fn test_make_key_spaces_become_plus() {
        let key = make_key(URL, &[("in", "state:06 county:037")]).unwrap();
        assert!(key.as_str().ends_with("in=state%3A06+county%3A037"));
    }

    #[test]
    fn test_make_key_rejects_relative_url() {
        let err = make_key("not a url", &[("get", "X")]).unwrap_err();
        assert!(matches!(err, CacheError::Key { .. }));
    }

    #[test]
    fn test_cache_key_serializes_as_plain_string() {
        let key = make_key(URL, &[("get", "X")]).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.as_str()));
    }
}
