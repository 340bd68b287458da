//! Incremental parser for ClickHouse `TSV` response bodies.
//!
//! The HTTP body arrives in chunks whose boundaries have nothing to do with
//! line boundaries. [`TsvChunkParser`] splits each chunk into complete lines,
//! carries the unterminated tail over to the next chunk, and splits every
//! complete line on tabs.

use crate::types::TsvRow;

/// Streaming TSV line splitter for one response body.
///
/// Holds exactly one piece of state, the carry-over: the bytes after the last
/// newline seen so far. Create a fresh parser per response.
///
/// # Example
///
/// ```
/// use clickhouse_stream::TsvChunkParser;
///
/// let mut parser = TsvChunkParser::new();
/// let mut rows = Vec::new();
///
/// parser.feed(b"1\ta\n2\t", |batch| rows.extend(batch));
/// parser.feed(b"b\n3", |batch| rows.extend(batch));
/// assert_eq!(rows, vec![vec!["1", "a"], vec!["2", "b"]]);
///
/// parser.finish(|batch| rows.extend(batch));
/// assert_eq!(rows.last().unwrap(), &vec!["3"]);
/// ```
#[derive(Debug, Default)]
pub struct TsvChunkParser {
    carry: Vec<u8>,
    rows_emitted: u64,
}

impl TsvChunkParser {
    /// Create a parser with an empty carry-over.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one body chunk.
    ///
    /// Every row completed by this chunk is delivered to `on_rows` in a single
    /// call, in order. Nothing is delivered if the chunk completes no line.
    /// Returns the number of bytes consumed, which is always `chunk.len()`.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_rows: F) -> usize
    where
        F: FnMut(Vec<TsvRow>),
    {
        let Some(&last) = chunk.last() else {
            return 0;
        };

        self.carry.extend_from_slice(chunk);
        let buffer = std::mem::take(&mut self.carry);

        let complete = if last == b'\n' {
            &buffer[..buffer.len() - 1]
        } else {
            match buffer.iter().rposition(|&b| b == b'\n') {
                Some(pos) => {
                    self.carry = buffer[pos + 1..].to_vec();
                    &buffer[..pos]
                }
                None => {
                    // No newline anywhere yet: the whole buffer stays pending.
                    self.carry = buffer;
                    return chunk.len();
                }
            }
        };

        let rows: Vec<TsvRow> = complete.split(|&b| b == b'\n').map(split_fields).collect();
        self.rows_emitted += rows.len() as u64;
        on_rows(rows);

        chunk.len()
    }

    /// Flush the carry-over at end of stream.
    ///
    /// A body whose final line lacks a newline still yields that line as a
    /// row. An empty carry-over delivers nothing.
    pub fn finish<F>(&mut self, mut on_rows: F)
    where
        F: FnMut(Vec<TsvRow>),
    {
        if self.carry.is_empty() {
            return;
        }
        let tail = std::mem::take(&mut self.carry);
        self.rows_emitted += 1;
        on_rows(vec![split_fields(&tail)]);
    }

    /// Bytes currently held back waiting for a newline.
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }

    /// Rows delivered so far.
    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }
}

/// Split one complete line into its tab separated fields.
fn split_fields(line: &[u8]) -> TsvRow {
    line.split(|&b| b == b'\t')
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}
