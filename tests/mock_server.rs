//! Request/response tests against an in-process HTTP responder.
//!
//! The responder speaks just enough HTTP/1.1 to capture one request per
//! connection and answer with a chunked body whose chunk boundaries the test
//! chooses, so no ClickHouse server is needed.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clickhouse_stream::{Client, Error, Progress, Query, TsvRow};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use futures::StreamExt;
use reqwest::Url;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A request as the responder saw it.
#[derive(Debug)]
struct Captured {
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn param(&self, name: &str) -> Option<String> {
        let url = Url::parse(&format!("http://mock{}", self.path)).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// A canned response, body sent as one HTTP chunk per entry.
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    chunks: Vec<Vec<u8>>,
}

impl MockResponse {
    fn ok(chunks: &[&str]) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
        }
    }

    fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: vec![body.as_bytes().to_vec()],
        }
    }

    /// A gzip-compressed body, split into two chunks mid-stream.
    fn gzip(body: &str) -> Self {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        let (head, tail) = compressed.split_at(compressed.len() / 2);
        Self {
            status: 200,
            headers: vec![("Content-Encoding".to_string(), "gzip".to_string())],
            chunks: vec![head.to_vec(), tail.to_vec()],
        }
    }

    fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Serve `responses` in order, one connection each, and return what was asked.
async fn serve(responses: Vec<MockResponse>) -> (Client, JoinHandle<Vec<Captured>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut captured = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            captured.push(read_request(&mut stream).await);
            write_response(&mut stream, response).await;
        }
        captured
    });

    let client = Client::new(format!("http://{}/", addr), "testdb");
    (client, handle)
}

fn gunzip(compressed: &[u8]) -> String {
    let mut body = String::new();
    MultiGzDecoder::new(compressed).read_to_string(&mut body).unwrap();
    body
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decode a complete chunked body, or `None` if more bytes are needed.
fn decode_chunked(mut raw: &[u8]) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = find(raw, b"\r\n")?;
        let size_line = std::str::from_utf8(&raw[..line_end]).ok()?;
        let size = usize::from_str_radix(size_line.split(';').next()?.trim(), 16).ok()?;
        raw = &raw[line_end + 2..];
        if size == 0 {
            return Some(body);
        }
        if raw.len() < size + 2 {
            return None;
        }
        body.extend_from_slice(&raw[..size]);
        raw = &raw[size + 2..];
    }
}

async fn read_request(stream: &mut TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut tmp).await.unwrap();
        assert!(n > 0, "connection closed before request head");
        buf.extend_from_slice(&tmp[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap();
    let path = request_line.split(' ').nth(1).unwrap().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut captured = Captured {
        path,
        headers,
        body: Vec::new(),
    };
    let mut raw = buf[head_end..].to_vec();

    if let Some(len) = captured.header("content-length") {
        let len: usize = len.parse().unwrap();
        while raw.len() < len {
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "connection closed before request body");
            raw.extend_from_slice(&tmp[..n]);
        }
        raw.truncate(len);
        captured.body = raw;
    } else if captured
        .header("transfer-encoding")
        .is_some_and(|v| v.contains("chunked"))
    {
        captured.body = loop {
            if let Some(body) = decode_chunked(&raw) {
                break body;
            }
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "connection closed before chunked body ended");
            raw.extend_from_slice(&tmp[..n]);
        };
    }

    captured
}

async fn write_response(stream: &mut TcpStream, response: MockResponse) {
    let mut head = format!("HTTP/1.1 {} Mock\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n");
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();

    for chunk in response.chunks.iter().filter(|c| !c.is_empty()) {
        stream
            .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
            .await
            .unwrap();
        stream.write_all(chunk).await.unwrap();
        stream.write_all(b"\r\n").await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stream.write_all(b"0\r\n\r\n").await.unwrap();
    stream.flush().await.unwrap();
    let _ = stream.shutdown().await;
}

const NUMBERS_JSON: &str = r#"{
    "meta": [{"name": "number", "type": "UInt64"}, {"name": "hi", "type": "String"}],
    "data": [
        {"number": "0", "hi": "hi"},
        {"number": "1", "hi": "hi"},
        {"number": "2", "hi": "hi"}
    ],
    "rows": 3,
    "statistics": {"elapsed": 0.0004, "rows_read": 3, "bytes_read": 24}
}"#;

const EMPTY_JSON: &str = r#"{"meta": [{"name": "number", "type": "UInt64"}], "data": [], "rows": 0}"#;

// ============================================================================
// Streaming TSV
// ============================================================================

#[tokio::test]
async fn test_streamed_rows_survive_chunk_boundaries() {
    let response = MockResponse::ok(&["1\ta\n2\t", "b\n3"])
        .header("X-ClickHouse-Progress", r#"{"read_rows":"1","total_rows_to_read":"3"}"#)
        .header("X-ClickHouse-Progress", r#"{"read_rows":"3","total_rows_to_read":"3"}"#)
        .header("X-ClickHouse-Summary", r#"{"read_rows":"3","total_rows_to_read":"3"}"#);
    let (client, server) = serve(vec![response]).await;

    let mut rows: Vec<TsvRow> = Vec::new();
    let mut progress: Vec<Progress> = Vec::new();
    let outcome = client
        .query_tsv_with_progress(
            "SELECT number, toString(number) FROM numbers(3)",
            |p| progress.push(p.clone()),
            |batch| rows.extend(batch),
        )
        .await
        .unwrap();

    assert_eq!(rows, vec![vec!["1", "a"], vec!["2", "b"], vec!["3"]]);
    assert_eq!(progress.len(), 2);
    assert_eq!(progress[0].read_rows(), Some(1));
    assert_eq!(progress[1].fraction(), Some(1.0));

    assert!(outcome.response.is_none());
    let summary = outcome.summary.expect("summary header");
    assert_eq!(summary.read_rows(), Some(3));
    assert_eq!(outcome.info.status, 200);
    assert_eq!(outcome.info.size_download, 9);
    assert_eq!(client.last_summary(), Some(summary));

    let requests = server.await.unwrap();
    let request = &requests[0];
    assert_eq!(request.header("x-clickhouse-format"), Some("TSV"));
    assert_eq!(request.header("x-clickhouse-database"), Some("testdb"));
    assert_eq!(request.header("accept-encoding"), Some("gzip"));
    assert_eq!(request.param("enable_http_compression").as_deref(), Some("1"));
    assert_eq!(request.param("send_progress_in_http_headers").as_deref(), Some("1"));
    assert_eq!(request.param("query"), None);
    assert_eq!(request.body, b"SELECT number, toString(number) FROM numbers(3)");
}

#[tokio::test]
async fn test_many_small_chunks() {
    let body: String = (0..100).map(|i| format!("{}\n", i)).collect();
    let chunks: Vec<&str> = body
        .as_bytes()
        .chunks(7)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect();
    let (client, _server) = serve(vec![MockResponse::ok(&chunks)]).await;

    let mut total = 0;
    let mut sum = 0u64;
    client
        .query_tsv("SELECT * FROM numbers(100)", |batch| {
            total += batch.len();
            for row in batch {
                sum += row[0].parse::<u64>().unwrap();
            }
        })
        .await
        .unwrap();

    assert_eq!(total, 100);
    assert_eq!(sum, 4950);
}

#[tokio::test]
async fn test_gzip_response_is_decoded() {
    let (client, server) = serve(vec![MockResponse::gzip("1\ta\n2\tb\n")]).await;

    let mut rows: Vec<TsvRow> = Vec::new();
    client
        .query_tsv("SELECT * FROM t", |batch| rows.extend(batch))
        .await
        .unwrap();

    assert_eq!(rows, vec![vec!["1", "a"], vec!["2", "b"]]);
    let requests = server.await.unwrap();
    assert_eq!(requests[0].header("accept-encoding"), Some("gzip"));
}

#[tokio::test]
async fn test_query_stream_yields_rows() {
    let response = MockResponse::ok(&["0\tx\n1", "\ty\n2\tz"])
        .header("X-ClickHouse-Summary", r#"{"read_rows":"3"}"#);
    let (client, _server) = serve(vec![response]).await;

    let mut stream = client.query_stream("SELECT number, c FROM t").await.unwrap();
    assert_eq!(stream.summary().and_then(|s| s.read_rows()), Some(3));
    assert_eq!(stream.info().status, 200);

    let mut rows = Vec::new();
    while let Some(row) = stream.next().await {
        rows.push(row.unwrap());
    }
    assert_eq!(rows, vec![vec!["0", "x"], vec!["1", "y"], vec!["2", "z"]]);
}

// ============================================================================
// Buffered JSON
// ============================================================================

#[tokio::test]
async fn test_json_query_and_params() {
    let response = MockResponse::ok(&[NUMBERS_JSON])
        .header("X-ClickHouse-Summary", r#"{"total_rows_to_read":"100000"}"#);
    let (client, server) = serve(vec![response]).await;

    let query = Query::new("SELECT number, 'hi' AS hi FROM numbers(5) WHERE number < {num:UInt32}")
        .param("num", 3)
        .param("label", "a b&c");
    let outcome = client.query(query).await.unwrap();

    let response = outcome.response.expect("json body");
    assert!(Arc::ptr_eq(&response, &client.last_response().unwrap()));
    assert_eq!(response.rows, 3);
    assert_eq!(response.meta[1].name, "hi");
    assert_eq!(response.data[2]["number"], json!("2"));
    assert_eq!(response.statistics.as_ref().map(|s| s.rows_read), Some(3));

    let summary = client.last_summary().unwrap();
    assert_eq!(summary.get("total_rows_to_read"), Some(&json!("100000")));
    assert_eq!(client.last_response().unwrap().rows, 3);
    assert_eq!(client.last_info().unwrap().status, 200);

    let requests = server.await.unwrap();
    let request = &requests[0];
    assert_eq!(request.header("x-clickhouse-format"), Some("JSON"));
    assert_eq!(request.param("param_num").as_deref(), Some("3"));
    assert_eq!(request.param("param_label").as_deref(), Some("a b&c"));
}

#[tokio::test]
async fn test_progress_with_buffered_result() {
    let response = MockResponse::ok(&[r#"{"data":[{"count()":"50000000"}],"rows":1}"#])
        .header("X-ClickHouse-Progress", r#"{"read_rows":"1000","total_rows_to_read":"50000000"}"#)
        .header("X-ClickHouse-Progress", r#"{"read_rows":"2000","total_rows_to_read":"50000000"}"#);
    let (client, _server) = serve(vec![response]).await;

    let mut history = Vec::new();
    let outcome = client
        .query_with_progress("SELECT count(*) FROM big", |p| history.push(p.read_rows()))
        .await
        .unwrap();

    assert_eq!(history, vec![Some(1000), Some(2000)]);
    assert_eq!(outcome.response.unwrap().data[0]["count()"], json!("50000000"));
}

#[tokio::test]
async fn test_row_and_column_helpers() {
    let responses = (0..4)
        .map(|_| MockResponse::ok(&[NUMBERS_JSON]))
        .collect();
    let (client, _server) = serve(responses).await;

    let rows = client.rows("SELECT number, 'hi' AS hi FROM numbers(3)").await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1]["hi"], json!("hi"));

    let cols = client.cols("SELECT number, 'hi' AS hi FROM numbers(3)").await.unwrap();
    assert_eq!(cols, vec![json!("0"), json!("1"), json!("2")]);

    let row = client.row("SELECT number, 'hi' AS hi FROM numbers(3)").await.unwrap().unwrap();
    assert_eq!(row.keys().collect::<Vec<_>>(), vec!["number", "hi"]);

    let col = client.col("SELECT number FROM numbers(3)").await.unwrap();
    assert_eq!(col, Some(json!("0")));
}

#[tokio::test]
async fn test_empty_result_is_not_an_error() {
    let responses = (0..2).map(|_| MockResponse::ok(&[EMPTY_JSON])).collect();
    let (client, _server) = serve(responses).await;

    assert_eq!(client.row("SELECT 1 WHERE 0").await.unwrap(), None);
    assert_eq!(client.col("SELECT 1 WHERE 0").await.unwrap(), None);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_error_status_carries_body() {
    let response = MockResponse::status(400, "Code: 62. DB::Exception: Syntax error")
        .header("X-ClickHouse-Summary", r#"{"read_rows":"0"}"#);
    let (client, _server) = serve(vec![response]).await;

    let err = client.query("SELECT FROM").await.unwrap_err();
    match err {
        Error::Status { status, body, info } => {
            assert_eq!(status, 400);
            assert!(body.contains("Syntax error"));
            assert_eq!(info.status, 400);
            assert!(info.url.contains("enable_http_compression=1"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(client.last_summary().is_none());
    assert!(client.last_info().is_none());
}

#[derive(Debug)]
struct MyClickhouseError(String);

impl std::fmt::Display for MyClickhouseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "my error: {}", self.0)
    }
}

impl std::error::Error for MyClickhouseError {}

#[tokio::test]
async fn test_error_hook_maps_errors() {
    let seen = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&seen);

    let (client, _server) = serve(vec![MockResponse::status(500, "boom")]).await;
    let client = client.with_error_hook(move |e| {
        *counter.lock().unwrap() += 1;
        Error::custom(MyClickhouseError(e.to_string()))
    });

    let err = client.query("SELECT bad_query").await.unwrap_err();
    let Error::Custom(inner) = err else {
        panic!("hook not applied");
    };
    assert!(inner.downcast_ref::<MyClickhouseError>().is_some());
    assert!(inner.to_string().contains("boom"));
    assert_eq!(*seen.lock().unwrap(), 1);
}

// ============================================================================
// Inserts
// ============================================================================

#[tokio::test]
async fn test_insert_positional_rows() {
    let (client, server) = serve(vec![MockResponse::ok(&[])]).await;

    let outcome = client
        .insert(
            "test",
            vec![
                json!([1, "2024-01-01 00:00:00"]),
                json!([2, "2024-01-02 00:00:00"]),
            ],
        )
        .await
        .unwrap();
    assert!(outcome.response.is_none());

    let requests = server.await.unwrap();
    assert_eq!(requests[0].param("query").as_deref(), Some("INSERT INTO \"test\" FORMAT TSV"));
    assert_eq!(requests[0].body, b"1\t2024-01-01 00:00:00\n2\t2024-01-02 00:00:00");
}

#[tokio::test]
async fn test_insert_named_rows() {
    let (client, server) = serve(vec![MockResponse::ok(&[])]).await;

    client
        .insert("test", vec![json!({"id": 1, "dt": "x"})])
        .await
        .unwrap();

    let requests = server.await.unwrap();
    assert_eq!(
        requests[0].param("query").as_deref(),
        Some("INSERT INTO \"test\" (id,dt) FORMAT TSV")
    );
    assert_eq!(requests[0].body, b"1\tx");
}

#[tokio::test]
async fn test_buffer_flush_streams_file_and_removes_it() {
    let (client, server) = serve(vec![MockResponse::ok(&[])]).await;

    let mut buffer = client.open_buffer("events").unwrap();
    buffer.append(vec![json!([1, "a"])]).await.unwrap();
    buffer.append(vec![json!([2, "b"]), json!([3, "c"])]).await.unwrap();
    let path = buffer.path().to_path_buf();

    let outcome = client.flush_buffer(buffer).await.unwrap();
    assert!(outcome.is_some());
    assert!(!path.exists());

    let requests = server.await.unwrap();
    assert_eq!(requests[0].param("query").as_deref(), Some("INSERT INTO \"events\" FORMAT TSV"));
    assert_eq!(requests[0].header("content-encoding"), Some("gzip"));
    assert_eq!(gunzip(&requests[0].body), "1\ta\n2\tb\n3\tc");
}

#[tokio::test]
async fn test_flushing_empty_buffer_sends_nothing() {
    let client = Client::new("http://127.0.0.1:9/", "default");
    let buffer = client.open_buffer("events").unwrap();
    let path = buffer.path().to_path_buf();

    assert!(client.flush_buffer(buffer).await.unwrap().is_none());
    assert!(!path.exists());
}
