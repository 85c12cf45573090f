//! Response validation and conversion for Census API calls

use reqwest::Response;
use serde_json::Value as JsonValue;

use super::CensusError;
use crate::data::Table;

/// Makes sure that a request succeeded and returns its JSON body
///
/// The transport can succeed while the query itself fails: the API then
/// answers with an object carrying an `error` field. Both cases are errors.
/// An empty body (the API's "no rows" answer) is returned as `Null`.
///
/// # Returns
/// * `Ok(JsonValue)` - the parsed body
/// * `Err(CensusError::Status)` - for a non-success HTTP status
/// * `Err(CensusError::Api)` - for an in-band error payload
/// * `Err(CensusError::MalformedResponse)` - if the body is not JSON
pub async fn check_response(response: Response) -> Result<JsonValue, CensusError> {
    let status = response.status();
    let url = response.url().to_string();
    let text = response.text().await?;

    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), body = %text.trim(), "request failed");
        return Err(CensusError::Status {
            status: status.as_u16(),
            url,
            body: text.trim().to_string(),
        });
    }

    if text.trim().is_empty() {
        return Ok(JsonValue::Null);
    }

    let json: JsonValue = serde_json::from_str(&text).map_err(|e| CensusError::MalformedResponse {
        url: url.clone(),
        reason: e.to_string(),
    })?;

    if let Some(error) = json.get("error") {
        let message = match error {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        tracing::warn!(status = status.as_u16(), error = %message, "query failed");
        return Err(CensusError::Api { message });
    }

    Ok(json)
}

/// Converts a query response into an all-text table
///
/// The body is a 2-D array whose first row holds the column names. Numbers
/// and booleans are kept as their JSON text; `null` becomes a missing value.
pub fn rows_to_table(url: &str, body: &JsonValue) -> Result<Table, CensusError> {
    let malformed = |reason: &str| CensusError::MalformedResponse {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let rows = body
        .as_array()
        .ok_or_else(|| malformed("expected a JSON array of rows"))?;
    let Some((header, data)) = rows.split_first() else {
        return Ok(Table::default());
    };

    let headers: Vec<String> = header
        .as_array()
        .ok_or_else(|| malformed("header row is not an array"))?
        .iter()
        .map(|h| h.as_str().map(str::to_string).unwrap_or_else(|| h.to_string()))
        .collect();

    let values = data
        .iter()
        .map(|row| {
            row.as_array()
                .map(|cells| cells.iter().map(cell_text).collect::<Vec<_>>())
                .ok_or_else(|| malformed("data row is not an array"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Table::from_text_rows(&headers, values))
}

fn cell_text(cell: &JsonValue) -> Option<String> {
    match cell {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
