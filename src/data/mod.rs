//! Tabular data model shared by the Census and TIGER clients
//!
//! This module contains the `Table` type that query results, cached results
//! and converted boundary files all share, plus the utilities for joining
//! Census and TIGER tables by geographic identifier.

pub mod merge;
pub mod table;

pub use merge::{merge_frames, strip_geoid_prefix, strip_prefix, MergeError, GEOID_COLUMN};
pub use table::{CoercionError, Column, ColumnType, Table, TableError, Value};
