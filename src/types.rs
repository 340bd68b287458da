//! Core request and response types.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::progress::Summary;
use crate::value::Value;

/// One row of a streamed TSV result, fields in server column order.
pub type TsvRow = Vec<String>;

/// One row of a JSON result, keyed by column name in server column order.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// Output format requested through `X-ClickHouse-Format`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// One JSON document, buffered in full.
    Json,
    /// Tab separated lines, decoded incrementally.
    Tsv,
}

impl Format {
    /// Header value for this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "JSON",
            Format::Tsv => "TSV",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body that replaces the SQL text, used by inserts.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// In-memory bytes.
    Bytes(Vec<u8>),
    /// A file streamed from disk without loading it into memory.
    File(PathBuf),
    /// A gzip-compressed file, streamed with `Content-Encoding: gzip`.
    GzipFile(PathBuf),
}

/// A single SQL statement with its named parameters and optional payload.
///
/// ```ignore
/// let query = Query::new("SELECT count(*) FROM numbers(100000) WHERE number > {num:UInt32}")
///     .param("num", 50000);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    sql: String,
    params: Vec<(String, Value)>,
    payload: Option<Payload>,
}

impl Query {
    /// Create a query from SQL text.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            payload: None,
        }
    }

    /// Bind a named parameter, sent as `param_<name>`.
    ///
    /// Binding the same name twice replaces the earlier value.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    /// Attach a raw body. The SQL then travels in the `query` URL parameter.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters in binding order.
    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    /// Raw body, if any.
    pub fn raw_payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub(crate) fn into_parts(self) -> (String, Vec<(String, Value)>, Option<Payload>) {
        (self.sql, self.params, self.payload)
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Query::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Query::new(sql)
    }
}

/// Column description from the `meta` section of a JSON result.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// ClickHouse type name, e.g. `UInt64`.
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Execution statistics from a JSON result.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Statistics {
    /// Seconds spent executing.
    #[serde(default)]
    pub elapsed: f64,
    /// Rows read by the server.
    #[serde(default)]
    pub rows_read: u64,
    /// Bytes read by the server.
    #[serde(default)]
    pub bytes_read: u64,
}

/// A buffered `FORMAT JSON` response.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct JsonResponse {
    /// Column metadata.
    #[serde(default)]
    pub meta: Vec<ColumnMeta>,
    /// Result rows.
    #[serde(default)]
    pub data: Vec<JsonRow>,
    /// Number of rows in `data`.
    #[serde(default)]
    pub rows: u64,
    /// Lower bound of rows before `LIMIT`, when the server reports it.
    #[serde(default)]
    pub rows_before_limit_at_least: Option<u64>,
    /// Execution statistics.
    #[serde(default)]
    pub statistics: Option<Statistics>,
    /// Any other top-level fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Transport diagnostics recorded for each request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestInfo {
    /// Full request URL including the query string.
    pub url: String,
    /// HTTP status code, 0 if none was received.
    pub status: u16,
    /// Decoded body bytes received.
    pub size_download: u64,
    /// `Content-Type` of the response, if any.
    pub content_type: Option<String>,
    /// Wall time from sending the request to the end of the body.
    pub elapsed: Duration,
}

/// Everything a single call produced.
#[derive(Clone, Debug, Default)]
pub struct QueryOutcome {
    /// Decoded JSON body, present in buffered mode.
    pub response: Option<Arc<JsonResponse>>,
    /// The last summary header of the response.
    pub summary: Option<Summary>,
    /// Transport diagnostics.
    pub info: RequestInfo,
}
