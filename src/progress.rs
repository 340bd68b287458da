//! Progress and summary metadata carried in ClickHouse response headers.
//!
//! With `send_progress_in_http_headers=1` the server emits
//! `X-ClickHouse-Progress` header lines while the query runs and a final
//! `X-ClickHouse-Summary` line. Both carry a flat JSON object whose counters
//! are usually quoted numbers (`{"read_rows":"10",...}`).

use std::ops::Deref;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Header carrying live progress.
pub const PROGRESS_HEADER: &str = "X-ClickHouse-Progress";

/// Header carrying the terminal summary.
pub const SUMMARY_HEADER: &str = "X-ClickHouse-Summary";

/// A snapshot of query progress decoded from one header line.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Progress {
    fields: Map<String, Value>,
}

impl Progress {
    /// Raw field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// All fields in server order.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Numeric field by name, accepting both JSON numbers and quoted numbers.
    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.fields.get(name)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Rows read so far.
    pub fn read_rows(&self) -> Option<u64> {
        self.counter("read_rows")
    }

    /// Bytes read so far.
    pub fn read_bytes(&self) -> Option<u64> {
        self.counter("read_bytes")
    }

    /// Rows written so far.
    pub fn written_rows(&self) -> Option<u64> {
        self.counter("written_rows")
    }

    /// Bytes written so far.
    pub fn written_bytes(&self) -> Option<u64> {
        self.counter("written_bytes")
    }

    /// Estimated rows the query will read.
    pub fn total_rows_to_read(&self) -> Option<u64> {
        self.counter("total_rows_to_read")
    }

    /// Rows in the result.
    pub fn result_rows(&self) -> Option<u64> {
        self.counter("result_rows")
    }

    /// Server-side elapsed time in nanoseconds.
    pub fn elapsed_ns(&self) -> Option<u64> {
        self.counter("elapsed_ns")
    }

    /// Share of rows read, in `0.0..=1.0`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_rows_to_read().filter(|t| *t > 0)?;
        let read = self.read_rows()?;
        Some((read as f64 / total as f64).min(1.0))
    }
}

/// The terminal metadata snapshot of a query.
///
/// Same fields as [`Progress`]; kept as its own type so the two cannot be
/// mixed up.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Summary(Progress);

impl Deref for Summary {
    type Target = Progress;

    fn deref(&self) -> &Progress {
        &self.0
    }
}

/// Routes response header lines to a progress callback and a summary slot.
///
/// Fed once per header line in arrival order. It never fails: lines it does
/// not understand are skipped so the transfer keeps going.
pub struct HeaderExtractor<F> {
    on_progress: Option<F>,
    summary: Option<Summary>,
}

impl HeaderExtractor<fn(&Progress)> {
    /// Extractor that only records the summary.
    pub fn without_progress() -> Self {
        Self {
            on_progress: None,
            summary: None,
        }
    }
}

impl<F: FnMut(&Progress)> HeaderExtractor<F> {
    /// Create an extractor that hands progress events to `on_progress`.
    pub fn new(on_progress: Option<F>) -> Self {
        Self {
            on_progress,
            summary: None,
        }
    }

    /// Consume one raw header line (`Name: value`, line ending optional).
    ///
    /// Returns the number of bytes consumed, which is always the line length.
    pub fn header_line(&mut self, line: &[u8]) -> usize {
        if let Some(colon) = line.iter().position(|&b| b == b':') {
            self.header(&line[..colon], &line[colon + 1..]);
        }
        line.len()
    }

    /// Consume one header given as name and value.
    pub fn header(&mut self, name: &[u8], value: &[u8]) {
        let name = name.trim_ascii();
        let value = value.trim_ascii();

        if name.eq_ignore_ascii_case(SUMMARY_HEADER.as_bytes()) {
            match serde_json::from_slice::<Summary>(value) {
                Ok(summary) => self.summary = Some(summary),
                Err(e) => tracing::warn!(error = %e, "ignoring undecodable summary header"),
            }
        } else if name.eq_ignore_ascii_case(PROGRESS_HEADER.as_bytes()) {
            let Some(on_progress) = self.on_progress.as_mut() else {
                return;
            };
            match serde_json::from_slice::<Progress>(value) {
                Ok(progress) => on_progress(&progress),
                Err(e) => tracing::warn!(error = %e, "ignoring undecodable progress header"),
            }
        }
    }

    /// Summary recorded so far.
    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    /// Take the recorded summary.
    pub fn into_summary(self) -> Option<Summary> {
        self.summary
    }
}
