//! ClickHouse HTTP client.
//!
//! This module provides the main `Client` type. Every call issues one HTTP
//! request and awaits it to completion; progress and row callbacks run on the
//! calling task while the response is still arriving.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Instant;

use async_stream::stream;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Body, Url};
use tokio_util::io::ReaderStream;

use crate::config::Config;
use crate::error::{Error, ErrorHook, Result};
use crate::insert::{InsertBuffer, InsertRow, encode_rows, insert_statement};
use crate::parser::TsvChunkParser;
use crate::progress::{HeaderExtractor, Progress, Summary};
use crate::types::{
    Format, JsonResponse, JsonRow, Payload, Query, QueryOutcome, RequestInfo, TsvRow,
};

const DATABASE_HEADER: &str = "X-ClickHouse-Database";
const FORMAT_HEADER: &str = "X-ClickHouse-Format";

/// Callback receiving live progress events.
pub type ProgressCallback<'a> = dyn FnMut(&Progress) + Send + 'a;

/// Callback receiving the rows completed by one body chunk.
pub type RowsCallback<'a> = dyn FnMut(Vec<TsvRow>) + Send + 'a;

/// Metadata of the most recent successful call on a client.
#[derive(Default)]
struct LastCall {
    response: Option<Arc<JsonResponse>>,
    info: Option<RequestInfo>,
    summary: Option<Summary>,
}

/// ClickHouse HTTP client.
///
/// Cheap to clone; clones share the HTTP connection pool and the
/// last-call metadata returned by [`Client::last_summary`] and friends.
/// Concurrent callers that need exact per-query metadata should read it from
/// the [`QueryOutcome`] each call returns.
///
/// # Example
///
/// ```ignore
/// use clickhouse_stream::{Client, Query};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::new("http://localhost:8123", "default");
///
///     let mut total = 0;
///     client
///         .query_tsv("SELECT * FROM numbers(100000)", |rows| total += rows.len())
///         .await?;
///
///     let count = client
///         .col(Query::new("SELECT count(*) FROM numbers(10) WHERE number > {n:UInt8}").param("n", 4))
///         .await?;
///     println!("{} rows streamed, count = {:?}", total, count);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    config: Config,
    base_url: Url,
    error_hook: Option<ErrorHook>,
    last: Arc<Mutex<LastCall>>,
}

impl Client {
    /// Create a new ClickHouse client.
    ///
    /// # Arguments
    ///
    /// * `url` - Base URL of the HTTP interface (e.g., "http://localhost:8123")
    /// * `database` - Database sent with every query
    ///
    /// # Panics
    ///
    /// Panics if the provided URL is invalid. Use [`Client::from_config`] to
    /// get an error instead.
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        let config = Config::default().with_url(url).with_database(database);
        Self::from_config(config).unwrap_or_else(|e| panic!("{}", e))
    }

    /// Create a client from a [`Config`].
    pub fn from_config(config: Config) -> Result<Self> {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    /// Create a client configured from `CLICKHOUSE_URL` and `CLICKHOUSE_DATABASE`.
    pub fn from_env() -> Result<Self> {
        Self::from_config(Config::from_env())
    }

    /// Create a new client with a custom reqwest client.
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_http_client(http: reqwest::Client, config: Config) -> Result<Self> {
        let base_url = config.parse_url()?;
        Ok(Self {
            http,
            config,
            base_url,
            error_hook: None,
            last: Arc::default(),
        })
    }

    /// Route every failed request through `hook` before it is returned.
    ///
    /// ```ignore
    /// let client = Client::new("http://localhost:8123", "default")
    ///     .with_error_hook(|e| Error::custom(MyError::from(e)));
    /// ```
    pub fn with_error_hook<H>(mut self, hook: H) -> Self
    where
        H: Fn(Error) -> Error + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Get the base URL.
    pub fn url(&self) -> &Url {
        &self.base_url
    }

    /// Get the database name.
    pub fn database(&self) -> &str {
        &self.config.database
    }

    /// Execute a query, the one request path every other method goes through.
    ///
    /// With `on_rows` the result is requested as `TSV` and each body chunk is
    /// split into rows as it arrives; the rows are never buffered in full.
    /// Without it the result is requested as `JSON`, buffered and decoded.
    /// `on_progress` sees every `X-ClickHouse-Progress` header.
    pub async fn execute(
        &self,
        query: Query,
        on_progress: Option<&mut ProgressCallback<'_>>,
        on_rows: Option<&mut RowsCallback<'_>>,
    ) -> Result<QueryOutcome> {
        let outcome = self
            .execute_inner(query, on_progress, on_rows)
            .await
            .map_err(|e| self.fail(e))?;
        self.record(&outcome);
        Ok(outcome)
    }

    async fn execute_inner(
        &self,
        query: Query,
        on_progress: Option<&mut ProgressCallback<'_>>,
        on_rows: Option<&mut RowsCallback<'_>>,
    ) -> Result<QueryOutcome> {
        let format = if on_rows.is_some() {
            Format::Tsv
        } else {
            Format::Json
        };
        let (response, mut info, started) = self.send(query, format).await?;

        let mut extractor = HeaderExtractor::new(on_progress);
        for (name, value) in response.headers() {
            extractor.header(name.as_str().as_bytes(), value.as_bytes());
        }
        let summary = extractor.into_summary();

        let response = match on_rows {
            Some(on_rows) => {
                let mut parser = TsvChunkParser::new();
                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    let chunk = chunk?;
                    info.size_download += parser.feed(&chunk, &mut *on_rows) as u64;
                }
                parser.finish(&mut *on_rows);
                tracing::debug!(rows = parser.rows_emitted(), "streamed TSV result");
                None
            }
            None => {
                let bytes = response.bytes().await?;
                info.size_download = bytes.len() as u64;
                if bytes.trim_ascii().is_empty() {
                    None
                } else {
                    Some(Arc::new(serde_json::from_slice::<JsonResponse>(&bytes)?))
                }
            }
        };

        info.elapsed = started.elapsed();
        tracing::debug!(
            status = info.status,
            bytes = info.size_download,
            elapsed_ms = info.elapsed.as_millis() as u64,
            "query complete"
        );

        Ok(QueryOutcome {
            response,
            summary,
            info,
        })
    }

    /// Build and send the request, failing on a non-success status.
    async fn send(
        &self,
        query: Query,
        format: Format,
    ) -> Result<(reqwest::Response, RequestInfo, Instant)> {
        let (sql, params, payload) = query.into_parts();

        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("enable_http_compression", "1");
            pairs.append_pair("send_progress_in_http_headers", "1");
            for (name, value) in &params {
                pairs.append_pair(&format!("param_{}", name), &value.to_string());
            }
            if payload.is_some() {
                pairs.append_pair("query", &sql);
            }
        }

        let mut content_encoding = None;
        let body = match payload {
            None => Body::from(sql),
            Some(Payload::Bytes(bytes)) => Body::from(bytes),
            Some(Payload::File(path)) => {
                let file = tokio::fs::File::open(&path).await?;
                Body::wrap_stream(ReaderStream::new(file))
            }
            Some(Payload::GzipFile(path)) => {
                let file = tokio::fs::File::open(&path).await?;
                content_encoding = Some("gzip");
                Body::wrap_stream(ReaderStream::new(file))
            }
        };

        tracing::debug!(
            database = %self.config.database,
            format = %format,
            params = params.len(),
            "sending query"
        );

        let started = Instant::now();
        let mut request = self
            .http
            .post(url.clone())
            .header(DATABASE_HEADER, &self.config.database)
            .header(FORMAT_HEADER, format.as_str())
            .header(ACCEPT_ENCODING, "gzip");
        if let Some(encoding) = content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        let response = request.body(body).send().await?;

        let status = response.status();
        let mut info = RequestInfo {
            url: url.to_string(),
            status: status.as_u16(),
            content_type: response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            ..RequestInfo::default()
        };

        if !status.is_success() {
            let body = response.text().await?;
            info.size_download = body.len() as u64;
            info.elapsed = started.elapsed();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
                info,
            });
        }

        Ok((response, info, started))
    }

    fn fail(&self, err: Error) -> Error {
        tracing::debug!(error = %err, "query failed");
        match &self.error_hook {
            Some(hook) => hook(err),
            None => err,
        }
    }

    fn lock_last(&self) -> MutexGuard<'_, LastCall> {
        self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, outcome: &QueryOutcome) {
        let mut last = self.lock_last();
        if let Some(response) = &outcome.response {
            last.response = Some(Arc::clone(response));
        }
        last.info = Some(outcome.info.clone());
        last.summary = outcome.summary.clone();
    }

    /// Execute a query and buffer the `JSON` result.
    pub async fn query(&self, query: impl Into<Query>) -> Result<QueryOutcome> {
        self.execute(query.into(), None, None).await
    }

    /// Execute a query and buffer the `JSON` result, reporting progress on the way.
    pub async fn query_with_progress<P>(
        &self,
        query: impl Into<Query>,
        mut on_progress: P,
    ) -> Result<QueryOutcome>
    where
        P: FnMut(&Progress) + Send,
    {
        let on_progress = &mut on_progress as &mut ProgressCallback<'_>;
        self.execute(query.into(), Some(on_progress), None).await
    }

    /// Execute a query and hand its `TSV` rows to `on_rows` batch by batch.
    ///
    /// Each call receives the rows completed by one body chunk. The returned
    /// outcome has no JSON response; its summary is the authoritative result.
    pub async fn query_tsv<F>(&self, query: impl Into<Query>, mut on_rows: F) -> Result<QueryOutcome>
    where
        F: FnMut(Vec<TsvRow>) + Send,
    {
        let on_rows = &mut on_rows as &mut RowsCallback<'_>;
        self.execute(query.into(), None, Some(on_rows)).await
    }

    /// Like [`Client::query_tsv`], also reporting progress.
    pub async fn query_tsv_with_progress<P, F>(
        &self,
        query: impl Into<Query>,
        mut on_progress: P,
        mut on_rows: F,
    ) -> Result<QueryOutcome>
    where
        P: FnMut(&Progress) + Send,
        F: FnMut(Vec<TsvRow>) + Send,
    {
        let on_progress = &mut on_progress as &mut ProgressCallback<'_>;
        let on_rows = &mut on_rows as &mut RowsCallback<'_>;
        self.execute(query.into(), Some(on_progress), Some(on_rows))
            .await
    }

    /// Execute a query and return its `TSV` rows as an async stream.
    ///
    /// The summary header is available as soon as the stream is returned.
    /// The client's last-call metadata is updated when the request succeeds,
    /// before the body is read.
    ///
    /// ```ignore
    /// use futures::StreamExt;
    ///
    /// let mut rows = client.query_stream("SELECT number FROM numbers(10)").await?;
    /// while let Some(row) = rows.next().await {
    ///     println!("{:?}", row?);
    /// }
    /// ```
    pub async fn query_stream(&self, query: impl Into<Query>) -> Result<RowStream> {
        let (response, info, _) = self
            .send(query.into(), Format::Tsv)
            .await
            .map_err(|e| self.fail(e))?;

        let mut extractor = HeaderExtractor::without_progress();
        for (name, value) in response.headers() {
            extractor.header(name.as_str().as_bytes(), value.as_bytes());
        }
        let summary = extractor.into_summary();

        self.record(&QueryOutcome {
            response: None,
            summary: summary.clone(),
            info: info.clone(),
        });

        let hook = self.error_hook.clone();
        let mut body = response.bytes_stream();
        let rows = stream! {
            let mut parser = TsvChunkParser::new();
            let mut ready: Vec<TsvRow> = Vec::new();
            loop {
                match body.next().await {
                    Some(Ok(chunk)) => {
                        parser.feed(&chunk, |batch| ready.extend(batch));
                        for row in ready.drain(..) {
                            yield Ok(row);
                        }
                    }
                    Some(Err(e)) => {
                        let err = Error::from(e);
                        yield Err(match &hook {
                            Some(hook) => hook(err),
                            None => err,
                        });
                        break;
                    }
                    None => {
                        parser.finish(|batch| ready.extend(batch));
                        for row in ready.drain(..) {
                            yield Ok(row);
                        }
                        break;
                    }
                }
            }
        };

        Ok(RowStream {
            summary,
            info,
            rows: Box::pin(rows),
        })
    }

    /// All rows of a `JSON` result.
    pub async fn rows(&self, query: impl Into<Query>) -> Result<Vec<JsonRow>> {
        let outcome = self.query(query).await?;
        Ok(outcome
            .response
            .map(|r| r.data.clone())
            .unwrap_or_default())
    }

    /// The first column of every row.
    pub async fn cols(&self, query: impl Into<Query>) -> Result<Vec<serde_json::Value>> {
        let rows = self.rows(query).await?;
        Ok(rows.into_iter().map(first_field).collect())
    }

    /// The first row, or `None` for an empty result.
    pub async fn row(&self, query: impl Into<Query>) -> Result<Option<JsonRow>> {
        let outcome = self.query(query).await?;
        Ok(outcome.response.and_then(|r| r.data.first().cloned()))
    }

    /// The first field of the first row, or `None` for an empty result.
    pub async fn col(&self, query: impl Into<Query>) -> Result<Option<serde_json::Value>> {
        let row = self.row(query).await?;
        Ok(row.map(first_field))
    }

    /// Insert rows into `table` with one request.
    ///
    /// Positional rows are written in table column order; named rows add a
    /// column list taken from the first row.
    pub async fn insert<I, R>(&self, table: &str, rows: I) -> Result<QueryOutcome>
    where
        I: IntoIterator<Item = R>,
        R: Into<InsertRow>,
    {
        let encoded = encode_rows(rows)?;
        let sql = insert_statement(table, encoded.columns.as_deref());
        tracing::debug!(table, rows = encoded.rows, "inserting rows");
        self.query(Query::new(sql).payload(Payload::Bytes(encoded.body.into_bytes())))
            .await
    }

    /// Open a temp-file staging buffer for inserts into `table`.
    pub fn open_buffer(&self, table: impl Into<String>) -> Result<InsertBuffer> {
        InsertBuffer::open(table)
    }

    /// Send everything staged in `buffer` as one insert and remove the file.
    ///
    /// The file is streamed from disk. It is removed whether or not the
    /// insert succeeds. Returns `None` without a request if nothing was staged.
    pub async fn flush_buffer(&self, buffer: InsertBuffer) -> Result<Option<QueryOutcome>> {
        if buffer.rows() == 0 {
            buffer.into_path().close()?;
            return Ok(None);
        }

        let sql = buffer.statement();
        tracing::debug!(table = buffer.table(), rows = buffer.rows(), "flushing insert buffer");

        let path = buffer.into_path();
        let outcome = self
            .query(Query::new(sql).payload(Payload::GzipFile(path.to_path_buf())))
            .await;
        let removed = path.close();

        let outcome = outcome?;
        removed?;
        Ok(Some(outcome))
    }

    /// The JSON body of the last successful buffered call.
    pub fn last_response(&self) -> Option<Arc<JsonResponse>> {
        self.lock_last().response.clone()
    }

    /// Transport diagnostics of the last successful call.
    pub fn last_info(&self) -> Option<RequestInfo> {
        self.lock_last().info.clone()
    }

    /// Summary header of the last successful call.
    pub fn last_summary(&self) -> Option<Summary> {
        self.lock_last().summary.clone()
    }
}

fn first_field(row: JsonRow) -> serde_json::Value {
    row.into_iter()
        .next()
        .map(|(_, value)| value)
        .unwrap_or(serde_json::Value::Null)
}

/// Rows of a `TSV` result, decoded while the body arrives.
pub struct RowStream {
    summary: Option<Summary>,
    info: RequestInfo,
    rows: Pin<Box<dyn Stream<Item = Result<TsvRow>> + Send>>,
}

impl RowStream {
    /// Summary header of the response.
    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    /// Transport diagnostics as of the response headers.
    pub fn info(&self) -> &RequestInfo {
        &self.info
    }
}

impl Stream for RowStream {
    type Item = Result<TsvRow>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rows.as_mut().poll_next(cx)
    }
}
