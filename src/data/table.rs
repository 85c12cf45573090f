//! In-memory tabular dataset
//!
//! A `Table` is an ordered list of named, typed columns plus rows of values.
//! It is what the Census client returns, what the query cache persists, and
//! what the TIGER converter produces from GeoJSON.

use std::fmt;
use std::io::{Read, Write};

use thiserror::Error;

/// Errors raised while reading or writing a table as delimited text
#[derive(Debug, Error)]
pub enum TableError {
    /// The underlying CSV reader or writer failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Flushing the output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value in a numeric column could not be parsed
    #[error("Column '{column}' is declared {kind} but holds '{value}'")]
    InvalidValue {
        column: String,
        kind: ColumnType,
        value: String,
    },

    /// A row has a different number of fields than the header
    #[error("Row {row} has {found} fields, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
}

/// A column could not be converted to a numeric type
///
/// Conversion failures are never fatal to a query; the column keeps its
/// textual form and the failure is reported to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Can't convert column '{column}' to numeric: '{value}'")]
pub struct CoercionError {
    /// Column that failed to convert
    pub column: String,
    /// First value that could not be parsed
    pub value: String,
}

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
}

impl ColumnType {
    /// Suffix used to annotate the column in a persisted header
    fn annotation(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "int",
            ColumnType::Float => "float",
        }
    }

    fn from_annotation(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ColumnType::Text),
            "int" => Some(ColumnType::Integer),
            "float" => Some(ColumnType::Float),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => write!(f, "text"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Float => write!(f, "float"),
        }
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
    Missing,
}

impl Value {
    /// Returns the text content for `Text` values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float; integers widen
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Missing => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

/// Column header: a name and a declared type
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

impl Column {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnType::Text,
        }
    }

    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Rows of named columns, order-preserving
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates an empty table with the given columns
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Creates an all-text table from headers and string rows
    ///
    /// Rows shorter than the header are padded with missing values; extra
    /// fields are dropped. Empty strings are stored as missing values, the
    /// only form an empty CSV field can be read back as.
    pub fn from_text_rows<S: AsRef<str>>(headers: &[S], rows: Vec<Vec<Option<String>>>) -> Self {
        let columns: Vec<Column> = headers.iter().map(|h| Column::text(h.as_ref())).collect();
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|row| {
                let mut values: Vec<Value> = row
                    .into_iter()
                    .take(width)
                    .map(|cell| match cell {
                        Some(text) if !text.is_empty() => Value::Text(text),
                        _ => Value::Missing,
                    })
                    .collect();
                values.resize(width, Value::Missing);
                values
            })
            .collect();
        Self { columns, rows }
    }

    /// Appends a row
    ///
    /// # Panics
    /// Panics if the row width does not match the number of columns.
    pub fn push_row(&mut self, row: Vec<Value>) {
        assert_eq!(
            row.len(),
            self.columns.len(),
            "row width must match column count"
        );
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// True when the table has no columns and no rows
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Declared type of a column by name
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column_index(name).map(|i| self.columns[i].kind)
    }

    /// Iterates over the values of one column
    pub fn column_values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Replaces every value of a column, keeping its position
    ///
    /// # Panics
    /// Panics if `values` does not have one entry per row.
    pub fn replace_column(&mut self, name: &str, kind: ColumnType, values: Vec<Value>) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        assert_eq!(values.len(), self.rows.len(), "one value per row");
        self.columns[idx].kind = kind;
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
        true
    }

    /// Removes a column by name, returning whether it existed
    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        true
    }

    /// Converts a text column to a numeric type
    ///
    /// The column becomes `Integer` when every present value parses as an
    /// `i64`, otherwise `Float` when every present value parses as an `f64`.
    /// On failure the column is left untouched. Already-numeric columns and
    /// unknown column names are a no-op.
    pub fn coerce_numeric(&mut self, name: &str) -> Result<(), CoercionError> {
        let Some(idx) = self.column_index(name) else {
            return Ok(());
        };
        if self.columns[idx].kind != ColumnType::Text {
            return Ok(());
        }

        let cells: Vec<&Value> = self.rows.iter().map(|row| &row[idx]).collect();

        let as_ints: Option<Vec<Value>> = cells
            .iter()
            .map(|v| match v {
                Value::Text(s) => s.trim().parse::<i64>().ok().map(Value::Int),
                other => Some((*other).clone()),
            })
            .collect();
        if let Some(values) = as_ints {
            self.replace_column(name, ColumnType::Integer, values);
            return Ok(());
        }

        let mut floats = Vec::with_capacity(cells.len());
        for v in &cells {
            match v {
                Value::Text(s) => match s.trim().parse::<f64>() {
                    Ok(x) => floats.push(Value::Float(x)),
                    Err(_) => {
                        return Err(CoercionError {
                            column: name.to_string(),
                            value: s.clone(),
                        })
                    }
                },
                Value::Int(i) => floats.push(Value::Float(*i as f64)),
                other => floats.push((*other).clone()),
            }
        }
        self.replace_column(name, ColumnType::Float, floats);
        Ok(())
    }

    /// Writes the table as CSV
    ///
    /// With `annotate_types`, every header carries a `:text`, `:int` or
    /// `:float` suffix so that `read_csv` restores the declared types even
    /// for names that themselves end in a suffix.
    pub fn write_csv<W: Write>(&self, writer: W, annotate_types: bool) -> Result<(), TableError> {
        let mut out = csv::Writer::from_writer(writer);

        let header: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if annotate_types {
                    format!("{}:{}", c.name, c.kind.annotation())
                } else {
                    c.name.clone()
                }
            })
            .collect();
        out.write_record(&header)?;

        for row in &self.rows {
            out.write_record(row.iter().map(|v| v.to_string()))?;
        }
        out.flush()?;
        Ok(())
    }

    /// Reads a table written by `write_csv` with type annotations
    ///
    /// Only the last `:` suffix is decoded. Headers without a recognised
    /// suffix are text columns. Empty fields become `Value::Missing`.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut input = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<Column> = input
            .headers()?
            .iter()
            .map(|h| match h.rsplit_once(':') {
                Some((name, suffix)) => match ColumnType::from_annotation(suffix) {
                    Some(kind) => Column::new(name, kind),
                    None => Column::text(h),
                },
                None => Column::text(h),
            })
            .collect();

        let mut table = Table::new(columns);
        for (i, record) in input.records().enumerate() {
            let record = record?;
            if record.len() != table.columns.len() {
                return Err(TableError::RaggedRow {
                    row: i + 1,
                    found: record.len(),
                    expected: table.columns.len(),
                });
            }
            let row = record
                .iter()
                .zip(&table.columns)
                .map(|(field, column)| parse_field(field, column))
                .collect::<Result<Vec<_>, _>>()?;
            table.rows.push(row);
        }
        Ok(table)
    }
}

fn parse_field(field: &str, column: &Column) -> Result<Value, TableError> {
    if field.is_empty() {
        return Ok(Value::Missing);
    }
    let invalid = || TableError::InvalidValue {
        column: column.name.clone(),
        kind: column.kind,
        value: field.to_string(),
    };
    match column.kind {
        ColumnType::Text => Ok(Value::Text(field.to_string())),
        ColumnType::Integer => field.parse().map(Value::Int).map_err(|_| invalid()),
        ColumnType::Float => field.parse().map(Value::Float).map_err(|_| invalid()),
    }
}
