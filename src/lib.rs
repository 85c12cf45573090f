//! censusbuddy library
//!
//! A caching client for the US Census Bureau data API and TIGER
//! cartographic boundary files, plus helpers to resolve FIPS codes and merge
//! census results with boundary data.
//!
//! Every Census query is cached on disk under a key derived from its
//! parameters (minus the API key), so repeated queries are answered without
//! touching the rate-limited API.

pub mod cache;
pub mod census;
pub mod cli;
pub mod config;
pub mod data;
pub mod geo;
pub mod tiger;
