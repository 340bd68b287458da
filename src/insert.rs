//! Bulk insert encoding and temp-file staged insert buffers.
//!
//! Rows are written as ClickHouse `TSV`: one row per line, cells separated by
//! tabs, special characters backslash-escaped. Named rows additionally produce
//! a column list for the `INSERT` statement.

use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::value::Value;

const BUFFER_PREFIX: &str = "clickhouse-insert-buffer";

/// One row handed to an insert.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertRow {
    /// Values in table column order.
    Positional(Vec<Value>),
    /// Column name and value pairs. The first row fixes the column order.
    Named(Vec<(String, Value)>),
}

impl InsertRow {
    /// Build a named row from column/value pairs.
    pub fn named<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        InsertRow::Named(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<V: Into<Value>> From<Vec<V>> for InsertRow {
    fn from(values: Vec<V>) -> Self {
        InsertRow::Positional(values.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for InsertRow {
    fn from(row: serde_json::Value) -> Self {
        match row {
            serde_json::Value::Array(values) => {
                InsertRow::Positional(values.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                InsertRow::Named(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
            scalar => InsertRow::Positional(vec![Value::from(scalar)]),
        }
    }
}

/// A TSV insert body and the column list it was written for.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedRows {
    /// Column list, present when the rows were named.
    pub columns: Option<Vec<String>>,
    /// Rows joined by `\n`, without a trailing newline.
    pub body: String,
    /// Number of rows in `body`.
    pub rows: usize,
}

/// Encode rows as a TSV insert body.
///
/// All rows must have the same shape as the first one: positional rows the
/// same length, named rows no columns the first row lacks. Named rows missing
/// a column get `\N` in its place.
pub fn encode_rows<I, R>(rows: I) -> Result<EncodedRows>
where
    I: IntoIterator<Item = R>,
    R: Into<InsertRow>,
{
    encode_rows_with(rows, None).map(|(encoded, _)| encoded)
}

/// Row shape fixed by the first row of an insert.
#[derive(Clone, Debug, PartialEq)]
enum Shape {
    Positional(usize),
    Named(Vec<String>),
}

impl Shape {
    fn of(row: &InsertRow) -> Self {
        match row {
            InsertRow::Positional(values) => Shape::Positional(values.len()),
            InsertRow::Named(pairs) => Shape::Named(pairs.iter().map(|(k, _)| k.clone()).collect()),
        }
    }

    fn columns(&self) -> Option<&[String]> {
        match self {
            Shape::Positional(_) => None,
            Shape::Named(names) => Some(names),
        }
    }
}

fn encode_rows_with<I, R>(rows: I, shape: Option<&Shape>) -> Result<(EncodedRows, Option<Shape>)>
where
    I: IntoIterator<Item = R>,
    R: Into<InsertRow>,
{
    let mut encoded = EncodedRows::default();
    let mut shape = shape.cloned();

    for (index, row) in rows.into_iter().enumerate() {
        let row = row.into();
        let current = shape.get_or_insert_with(|| Shape::of(&row));

        if index > 0 {
            encoded.body.push('\n');
        }

        match (&*current, row) {
            (Shape::Positional(expected), InsertRow::Positional(values)) => {
                if values.len() != *expected {
                    return Err(Error::InsertShape {
                        row: index,
                        message: format!("expected {} values, got {}", expected, values.len()),
                    });
                }
                write_cells(&mut encoded.body, values.iter());
            }
            (Shape::Named(names), InsertRow::Named(mut pairs)) => {
                if let Some((extra, _)) = pairs.iter().find(|(k, _)| !names.contains(k)) {
                    return Err(Error::InsertShape {
                        row: index,
                        message: format!("unknown column '{}'", extra),
                    });
                }
                let ordered: Vec<Value> = names
                    .iter()
                    .map(|name| {
                        pairs
                            .iter()
                            .position(|(k, _)| k == name)
                            .map(|i| pairs.swap_remove(i).1)
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                write_cells(&mut encoded.body, ordered.iter());
            }
            (Shape::Positional(_), InsertRow::Named(_)) => {
                return Err(Error::InsertShape {
                    row: index,
                    message: "named row among positional rows".to_string(),
                });
            }
            (Shape::Named(_), InsertRow::Positional(_)) => {
                return Err(Error::InsertShape {
                    row: index,
                    message: "positional row among named rows".to_string(),
                });
            }
        }
        encoded.rows += 1;
    }

    encoded.columns = shape.as_ref().and_then(Shape::columns).map(<[String]>::to_vec);
    Ok((encoded, shape))
}

fn write_cells<'a>(out: &mut String, values: impl Iterator<Item = &'a Value>) {
    for (i, value) in values.enumerate() {
        if i > 0 {
            out.push('\t');
        }
        value.write_tsv(out);
    }
}

/// Build `INSERT INTO "table" (a,b) FORMAT TSV`.
pub fn insert_statement(table: &str, columns: Option<&[String]>) -> String {
    let mut sql = format!("INSERT INTO \"{}\"", table.replace('"', "\\\""));
    if let Some(columns) = columns.filter(|c| !c.is_empty()) {
        sql.push_str(" (");
        sql.push_str(&columns.join(","));
        sql.push(')');
    }
    sql.push_str(" FORMAT TSV");
    sql
}

/// Rows staged in a temporary file, waiting to be sent as one insert.
///
/// Created with [`Client::open_buffer`](crate::Client::open_buffer) and sent
/// with [`Client::flush_buffer`](crate::Client::flush_buffer), which consumes
/// it. Each append adds one gzip member to the file, so the whole file is a
/// valid multi-member gzip stream. The staging file is removed when the
/// buffer is flushed or dropped.
#[derive(Debug)]
pub struct InsertBuffer {
    table: String,
    path: TempPath,
    shape: Option<Shape>,
    rows: usize,
}

impl InsertBuffer {
    /// Create an empty staging file for `table`.
    pub fn open(table: impl Into<String>) -> Result<Self> {
        let file = tempfile::Builder::new().prefix(BUFFER_PREFIX).tempfile()?;
        Ok(Self {
            table: table.into(),
            path: file.into_temp_path(),
            shape: None,
            rows: 0,
        })
    }

    /// Append rows to the staging file.
    ///
    /// The first non-empty batch fixes the row shape for the whole buffer.
    pub async fn append<I, R>(&mut self, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = R>,
        R: Into<InsertRow>,
    {
        let (encoded, shape) = encode_rows_with(rows, self.shape.as_ref())?;
        if encoded.rows == 0 {
            return Ok(0);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        if self.rows > 0 {
            encoder.write_all(b"\n")?;
        }
        encoder.write_all(encoded.body.as_bytes())?;
        let member = encoder.finish()?;

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&member).await?;
        file.flush().await?;

        self.shape = shape;
        self.rows += encoded.rows;
        tracing::debug!(
            table = %self.table,
            rows = encoded.rows,
            total = self.rows,
            compressed = member.len(),
            "staged insert rows"
        );
        Ok(encoded.rows)
    }

    /// Destination table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Rows staged so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Staging file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The statement the staged rows will be sent with.
    pub fn statement(&self) -> String {
        let columns = self.shape.as_ref().and_then(Shape::columns);
        insert_statement(&self.table, columns)
    }

    pub(crate) fn into_path(self) -> TempPath {
        self.path
    }
}
