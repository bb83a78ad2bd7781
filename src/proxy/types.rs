//! Wire types shared by the proxy and the query client.
//!
//! Everything here serializes to the JSON shapes used on the `/api/query`
//! endpoint: camelCase keys, rows as column-name maps.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single result row: column name to JSON value.
pub type Row = Map<String, Value>;

/// A statement to execute with its positional bind values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// SQL text. Absent, empty, and non-string values are all rejected by
    /// the proxy as missing text.
    #[serde(default, deserialize_with = "string_or_none")]
    pub text: Option<String>,
    /// Bind values for `$1`, `$2`, ... in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
}

impl QueryRequest {
    /// Creates a request without bind values.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            params: None,
        }
    }

    /// Sets the bind values.
    #[must_use]
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = Some(params);
        self
    }

    /// Statement text, or `None` when absent or empty.
    #[must_use]
    pub fn statement(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.is_empty())
    }

    /// Bind values, empty when none were given.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        self.params.as_deref().unwrap_or_default()
    }
}

/// Describes one result column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    /// PostgreSQL type OID.
    #[serde(rename = "dataTypeID", default)]
    pub data_type_id: u32,
    #[serde(default)]
    pub data_type_name: String,
    /// OID of the table the column comes from, if it is a plain table column.
    #[serde(rename = "tableID", default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u32>,
    /// Attribute number of the column within its table.
    #[serde(rename = "columnID", default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<i16>,
}

/// Normalized result of a successful statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub rows: Vec<Row>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub row_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<Field>,
}

/// Raw output of a driver call. Any part may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverOutput {
    pub rows: Option<Vec<Row>>,
    pub row_count: Option<u64>,
    pub fields: Option<Vec<Field>>,
}

impl From<DriverOutput> for QueryResult {
    fn from(output: DriverOutput) -> Self {
        Self {
            rows: output.rows.unwrap_or_default(),
            row_count: output.row_count.unwrap_or_default(),
            fields: output.fields.unwrap_or_default(),
        }
    }
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(Some(text)),
        _ => Ok(None),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
