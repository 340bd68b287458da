//! # clickhouse-stream
//!
//! Async client for the ClickHouse HTTP interface that streams `TSV` results
//! row by row and reports query progress while the response is still arriving.
//!
//! ## Why?
//!
//! Buffering a whole result set as one JSON document is fine for a handful of
//! rows, but a `SELECT` over millions of rows should not have to fit in memory:
//!
//! ```ignore
//! // Rows are handed over chunk by chunk, never buffered in full.
//! let mut sum = 0u64;
//! client
//!     .query_tsv("SELECT number FROM numbers(100000)", |rows| {
//!         for row in rows {
//!             sum += row[0].parse::<u64>().unwrap_or(0);
//!         }
//!     })
//!     .await?;
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use clickhouse_stream::{Client, Query};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::from_env()?;
//!
//!     let outcome = client
//!         .query_with_progress(
//!             "SELECT count(*) FROM (SELECT * FROM numbers(50000000) ORDER BY rand())",
//!             |progress| {
//!                 if let Some(f) = progress.fraction() {
//!                     println!("{:.0}%", f * 100.0);
//!                 }
//!             },
//!         )
//!         .await?;
//!     println!("{:?}", outcome.response.map(|r| r.data.clone()));
//!
//!     let rows = client
//!         .rows(Query::new("SELECT number FROM numbers(10) WHERE number > {n:UInt8}").param("n", 5))
//!         .await?;
//!     assert_eq!(rows.len(), 4);
//!
//!     client
//!         .insert("events", vec![serde_json::json!({"id": 1, "dt": "2024-01-01 00:00:00"})])
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Streaming TSV**: rows are split out of each body chunk as it arrives,
//!   with partial lines carried across chunk boundaries
//! - **Live progress**: `X-ClickHouse-Progress` headers reach a callback during
//!   the request; the final `X-ClickHouse-Summary` is kept per call
//! - **Buffered JSON**: `rows`, `cols`, `row` and `col` helpers for small results
//! - **Bulk inserts**: TSV encoded in memory or staged in a temporary file
//! - **Error handling**: all errors are returned as Results, with an optional
//!   hook to map them into your own error type

pub mod client;
pub mod config;
pub mod error;
pub mod insert;
pub mod parser;
pub mod progress;
pub mod types;
pub mod value;

// Re-export main types at crate root
pub use client::{Client, ProgressCallback, RowStream, RowsCallback};
pub use config::Config;
pub use error::{Error, ErrorHook, Result};
pub use insert::{EncodedRows, InsertBuffer, InsertRow};
pub use progress::{Progress, Summary};
pub use types::{
    ColumnMeta, Format, JsonResponse, JsonRow, Payload, Query, QueryOutcome, RequestInfo,
    Statistics, TsvRow,
};
pub use value::Value;

// Re-export the chunk parser for advanced use cases
pub use parser::TsvChunkParser;
