//! Shapefile unpacking and GeoJSON conversion
//!
//! Conversion shells out to GDAL's `ogr2ogr`, reprojecting to WGS84
//! longitude/latitude (`crs:84`).

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::path::Path;

use serde_json::Value as JsonValue;
use tokio::process::Command;

use super::TigerError;
use crate::data::Table;

/// Name of the column holding each feature's geometry as GeoJSON text
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Extracts every entry of a zip archive into `dest`
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), TigerError> {
    let file = File::open(archive).map_err(|e| TigerError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file)?;
    zip.extract(dest)?;
    tracing::debug!(entries = zip.len(), dest = %dest.display(), "archive unpacked");
    Ok(())
}

/// Whether the converter can be found on `PATH` (or at the given path)
pub fn converter_available(converter: &str) -> bool {
    which::which(converter).is_ok()
}

/// Builds the `ogr2ogr` argument list
///
/// # Arguments
/// * `simplify` - simplification tolerance; `0` or less disables it
/// * `geojson` - output file
/// * `shapefile` - input `.shp` file
pub fn converter_args(simplify: f64, geojson: &Path, shapefile: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if simplify > 0.0 {
        args.push("-simplify".into());
        args.push(simplify.to_string().into());
    }
    args.extend(["-f", "GeoJSON", "-t_srs", "crs:84"].map(OsString::from));
    args.push(geojson.as_os_str().to_os_string());
    args.push(shapefile.as_os_str().to_os_string());
    args
}

/// Runs the converter
///
/// # Returns
/// * `Ok(true)` - the converter exited successfully
/// * `Ok(false)` - the converter ran but failed
/// * `Err(TigerError::Io)` - the converter could not be started
pub async fn run_converter(converter: &str, args: &[OsString]) -> Result<bool, TigerError> {
    tracing::debug!(converter, ?args, "running converter");
    let output = Command::new(converter)
        .args(args)
        .output()
        .await
        .map_err(|e| TigerError::io(Path::new(converter), e))?;

    if output.status.success() {
        Ok(true)
    } else {
        tracing::warn!(
            converter,
            status = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "conversion failed"
        );
        Ok(false)
    }
}

/// Reads a GeoJSON feature collection into a table
///
/// Columns are the union of feature properties in first-seen order, followed
/// by [`GEOMETRY_COLUMN`]. Properties that are JSON numbers in every feature
/// become numeric columns; everything else stays text, so codes like
/// `"06"` keep their leading zeros.
pub fn geojson_to_table(text: &str) -> Result<Table, TigerError> {
    let doc: JsonValue =
        serde_json::from_str(text).map_err(|e| TigerError::GeoJson(e.to_string()))?;
    let features = doc
        .get("features")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| TigerError::GeoJson("missing features array".to_string()))?;

    let mut names: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut numeric: Vec<bool> = Vec::new();
    for feature in features {
        let Some(props) = feature.get("properties").and_then(JsonValue::as_object) else {
            continue;
        };
        for (name, value) in props {
            let idx = *positions.entry(name.clone()).or_insert_with(|| {
                names.push(name.clone());
                numeric.push(true);
                names.len() - 1
            });
            if !(value.is_number() || value.is_null()) {
                numeric[idx] = false;
            }
        }
    }

    let rows = features
        .iter()
        .map(|feature| {
            let props = feature.get("properties").and_then(JsonValue::as_object);
            let mut row: Vec<Option<String>> = names
                .iter()
                .map(|name| props.and_then(|p| p.get(name)).and_then(property_text))
                .collect();
            row.push(
                feature
                    .get("geometry")
                    .filter(|g| !g.is_null())
                    .map(JsonValue::to_string),
            );
            row
        })
        .collect();

    let mut headers = names.clone();
    headers.push(GEOMETRY_COLUMN.to_string());
    let mut table = Table::from_text_rows(&headers, rows);

    for (name, is_numeric) in names.iter().zip(numeric) {
        if is_numeric {
            table
                .coerce_numeric(name)
                .map_err(|e| TigerError::GeoJson(e.to_string()))?;
        }
    }
    Ok(table)
}

fn property_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Reads a cached GeoJSON file into a table
pub fn read_geojson(path: &Path) -> Result<Table, TigerError> {
    let text = std::fs::read_to_string(path).map_err(|e| TigerError::io(path, e))?;
    geojson_to_table(&text)
}
