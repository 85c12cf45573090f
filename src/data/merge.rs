//! Joining Census query results with TIGER boundary tables
//!
//! Census results carry a summary-level prefix on their `GEOID`s
//! (`0400000US06`) while TIGER tables use the bare code (`06`), so the join
//! normalizes the Census side first.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::table::{Column, Table, Value};

/// Column both tables are joined on
pub const GEOID_COLUMN: &str = "GEOID";

/// Longest prefix `strip_prefix` will look for
const MAX_PREFIX_CHARS: usize = 100;

/// Errors that can occur when merging tables
#[derive(Debug, Error)]
pub enum MergeError {
    /// One of the inputs lacks the join column
    #[error("Table '{table}' has no '{column}' column")]
    MissingColumn { table: &'static str, column: String },
}

fn summary_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| Regex::new(r"^.*US").expect("static regex"))
}

/// Removes the Census summary-level prefix from a `GEOID`
///
/// `"0400000US06"` becomes `"06"`; values without the marker are unchanged.
pub fn strip_geoid_prefix(geoid: &str) -> String {
    summary_prefix().replace(geoid, "").into_owned()
}

/// Strips the longest leading prefix shared by every value
///
/// Useful for the junk prefixes on `GEOID`s when the marker is unknown.
///
/// # Example
/// `["XYZfo", "XYZbar", "XYZ"]` becomes `["fo", "bar", ""]`.
pub fn strip_prefix<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let Some(first) = values.first() else {
        return Vec::new();
    };

    let mut prefix_len = 0;
    for (offset, ch) in first.as_ref().char_indices().take(MAX_PREFIX_CHARS) {
        let shared = values
            .iter()
            .all(|v| v.as_ref().is_char_boundary(offset) && v.as_ref()[offset..].starts_with(ch));
        if !shared {
            break;
        }
        prefix_len = offset + ch.len_utf8();
    }

    values
        .iter()
        .map(|v| v.as_ref()[prefix_len..].to_string())
        .collect()
}

/// Inner-joins a Census result with a boundary table on `GEOID`
///
/// The Census `GEOID` is normalized with [`strip_geoid_prefix`] before
/// comparison. Columns present in both inputs keep the boundary table's
/// version. Rows whose `GEOID` has no partner are dropped; output rows follow
/// the Census table's order.
///
/// # Returns
/// * `Ok(Table)` - the joined table: Census columns first, then boundary columns
/// * `Err(MergeError::MissingColumn)` - if either input lacks `GEOID`
pub fn merge_frames(census: &Table, geo: &Table) -> Result<Table, MergeError> {
    let census_key = census
        .column_index(GEOID_COLUMN)
        .ok_or_else(|| MergeError::MissingColumn {
            table: "census",
            column: GEOID_COLUMN.to_string(),
        })?;
    let geo_key = geo
        .column_index(GEOID_COLUMN)
        .ok_or_else(|| MergeError::MissingColumn {
            table: "geo",
            column: GEOID_COLUMN.to_string(),
        })?;

    // Census columns that survive: the join key plus anything the geo side lacks
    let census_keep: Vec<usize> = census
        .columns()
        .iter()
        .enumerate()
        .filter(|(i, c)| *i == census_key || geo.column_index(&c.name).is_none())
        .map(|(i, _)| i)
        .collect();
    let geo_keep: Vec<usize> = (0..geo.num_columns()).filter(|i| *i != geo_key).collect();

    let mut columns: Vec<Column> = census_keep
        .iter()
        .map(|&i| census.columns()[i].clone())
        .collect();
    columns.extend(geo_keep.iter().map(|&i| geo.columns()[i].clone()));
    let mut joined = Table::new(columns);

    let mut geo_rows: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in geo.rows().iter().enumerate() {
        geo_rows.entry(row[geo_key].to_string()).or_default().push(i);
    }

    for row in census.rows() {
        let key = strip_geoid_prefix(&row[census_key].to_string());
        let Some(partners) = geo_rows.get(&key) else {
            continue;
        };
        for &g in partners {
            let mut out: Vec<Value> = census_keep
                .iter()
                .map(|&i| {
                    if i == census_key {
                        Value::Text(key.clone())
                    } else {
                        row[i].clone()
                    }
                })
                .collect();
            out.extend(geo_keep.iter().map(|&i| geo.rows()[g][i].clone()));
            joined.push_row(out);
        }
    }

    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ColumnType;

    fn census_table() -> Table {
        let mut table = Table::new(vec![
            Column::text("GEOID"),
            Column::text("NAME"),
            Column::new("POP", ColumnType::Integer),
        ]);
        table.push_row(vec!["0400000US06".into(), "California (census)".into(), 39_000_000i64.into()]);
        table.push_row(vec!["0400000US41".into(), "Oregon (census)".into(), 4_200_000i64.into()]);
        table.push_row(vec!["0400000US72".into(), "Puerto Rico".into(), 3_200_000i64.into()]);
        table
    }

    fn geo_table() -> Table {
        let mut table = Table::new(vec![
            Column::text("GEOID"),
            Column::text("NAME"),
            Column::text("geometry"),
        ]);
        table.push_row(vec!["41".into(), "Oregon".into(), "{}".into()]);
        table.push_row(vec!["06".into(), "California".into(), "{}".into()]);
        table.push_row(vec!["53".into(), "Washington".into(), "{}".into()]);
        table
    }

    #[test]
    fn test_strip_prefix_shared_junk() {
        assert_eq!(strip_prefix(&["XYZfo", "XYZbar", "XYZ"]), vec!["fo", "bar", ""]);
    }

    #[test]
    fn test_strip_prefix_no_common_prefix() {
        assert_eq!(strip_prefix(&["abc", "xyz"]), vec!["abc", "xyz"]);
    }

    #[test]
    fn test_strip_prefix_identical_values() {
        assert_eq!(strip_prefix(&["same", "same"]), vec!["", ""]);
    }

    #[test]
    fn test_strip_prefix_empty_input() {
        let empty: [&str; 0] = [];
        assert!(strip_prefix(&empty).is_empty());
    }

    #[test]
    fn test_strip_prefix_multibyte() {
        assert_eq!(strip_prefix(&["ñaa", "ñab"]), vec!["a", "b"]);
    }

    #[test]
    fn test_strip_geoid_prefix() {
        assert_eq!(strip_geoid_prefix("0400000US06"), "06");
        assert_eq!(strip_geoid_prefix("1600000US0644000"), "0644000");
        assert_eq!(strip_geoid_prefix("06037"), "06037");
    }

    #[test]
    fn test_merge_joins_on_stripped_geoid() {
        let merged = merge_frames(&census_table(), &geo_table()).expect("merge should succeed");

        assert_eq!(merged.column_names(), vec!["GEOID", "POP", "NAME", "geometry"]);
        assert_eq!(merged.num_rows(), 2);
        let expected: Vec<Value> = vec![
            "06".into(),
            39_000_000i64.into(),
            "California".into(),
            "{}".into(),
        ];
        assert_eq!(merged.rows()[0], expected);
        assert_eq!(merged.rows()[1][2], Value::from("Oregon"));
    }

    #[test]
    fn test_merge_disjoint_identifiers_yields_no_rows() {
        let mut geo = Table::new(vec![Column::text("GEOID"), Column::text("NAME")]);
        geo.push_row(vec!["99".into(), "Nowhere".into()]);

        let merged = merge_frames(&census_table(), &geo).unwrap();
        assert_eq!(merged.num_rows(), 0);
        assert_eq!(merged.column_names(), vec!["GEOID", "POP", "NAME"]);
    }

    #[test]
    fn test_merge_requires_geoid() {
        let geo = Table::new(vec![Column::text("NAME")]);
        let err = merge_frames(&census_table(), &geo).unwrap_err();
        assert!(matches!(err, MergeError::MissingColumn { table: "geo", .. }));
    }
}
