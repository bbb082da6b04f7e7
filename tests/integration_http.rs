use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use reqrun::prelude::{
    BodyEncoding, Client, Configuration, Error, ErrorCode, InterceptionAction,
};
use serde_json::{Value, json};

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<String>,
        delay: Duration,
    ) -> Self {
        Self::new_bytes(status, headers, body.into().into_bytes(), delay)
    }

    fn new_bytes(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<Vec<u8>>,
        delay: Duration,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into(),
            delay,
        }
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            let mut response_index = 0;

            while response_index < responses.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;

                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }

                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let is_chunked = headers
        .get("transfer-encoding")
        .is_some_and(|value| value.eq_ignore_ascii_case("chunked"));
    let mut body = raw[header_end + 4..].to_vec();
    if is_chunked {
        // Drain the framed body so closing the socket cannot race the
        // client's response read. The captured body keeps its chunk framing.
        while !body.ends_with(b"0\r\n\r\n") {
            let mut chunk = [0_u8; 1024];
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
    } else {
        while body.len() < content_length {
            let mut chunk = [0_u8; 1024];
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
        body.truncate(content_length);
    }

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn client_for(server: &MockServer) -> Client {
    Client::try_new(Configuration::for_base_url(server.base_url.clone()))
        .expect("client should build")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn posts_json_params_and_decodes_response() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        r#"{"ok":true,"id":42}"#,
        Duration::ZERO,
    )]);
    let client = client_for(&server);

    let decoded: Value = client
        .post("/v1/items")
        .body_encoding(BodyEncoding::Json)
        .param("key1", "v1")
        .param("key2", "v2")
        .send_json()
        .await
        .expect("request should succeed");
    assert_eq!(decoded["ok"], Value::Bool(true));
    assert_eq!(decoded["id"], json!(42));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/v1/items");
    assert_eq!(
        requests[0].headers.get("content-type"),
        Some(&"application/json".to_owned())
    );
    let sent: Value =
        serde_json::from_slice(&requests[0].body).expect("request body should be json");
    assert_eq!(sent, json!({ "key1": "v1", "key2": "v2" }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_params_bind_to_the_query_string() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        "[]",
        Duration::ZERO,
    )]);
    let client = Client::try_new(
        Configuration::for_base_url(server.base_url.clone())
            .try_with_default_header("x-api-key", "secret")
            .expect("default header should parse"),
    )
    .expect("client should build");

    let body = client
        .get("/v1/search")
        .param("q", "rust")
        .param("page", 2)
        .send_string()
        .await
        .expect("request should succeed");
    assert_eq!(body, "[]");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert!(
        requests[0].path.starts_with("/v1/search?"),
        "params should move into the query: {}",
        requests[0].path
    );
    assert!(requests[0].path.contains("q=rust"));
    assert!(requests[0].path.contains("page=2"));
    assert!(requests[0].body.is_empty());
    assert_eq!(
        requests[0].headers.get("x-api-key"),
        Some(&"secret".to_owned())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_success_status_surfaces_with_body_snippet() {
    let server = MockServer::start(vec![MockResponse::new(
        503,
        Vec::<(String, String)>::new(),
        "overloaded",
        Duration::ZERO,
    )]);
    let client = client_for(&server);

    let error = client
        .get("/v1/items")
        .send()
        .await
        .expect_err("503 should fail under the default status policy");
    match error {
        Error::NotSuccess { status, body, .. } => {
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("unexpected error variant: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_status_policy_accepts_any_status() {
    let server = MockServer::start(vec![MockResponse::new(
        404,
        Vec::<(String, String)>::new(),
        "missing",
        Duration::ZERO,
    )]);
    let client = client_for(&server);

    let response = client
        .get("/v1/items/999")
        .status_policy(reqrun::StatusPolicy::any_status())
        .send()
        .await
        .expect("any-status policy should accept 404");
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.text().expect("body should be utf-8"), "missing");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_body_is_an_error_unless_allowed() {
    let server = MockServer::start(vec![
        MockResponse::new(200, Vec::<(String, String)>::new(), "", Duration::ZERO),
        MockResponse::new(200, Vec::<(String, String)>::new(), "", Duration::ZERO),
    ]);
    let client = client_for(&server);

    let error = client
        .get("/v1/empty")
        .send()
        .await
        .expect_err("empty 200 body should fail by default");
    assert_eq!(error.code(), ErrorCode::EmptyResponseBody);

    let response = client
        .get("/v1/empty")
        .allow_empty_body(true)
        .send()
        .await
        .expect("empty body should pass when allowed");
    assert!(response.body().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_responses_time_out() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        "late",
        Duration::from_millis(400),
    )]);
    let client = client_for(&server);

    let error = client
        .get("/v1/slow")
        .timeout(Duration::from_millis(50))
        .send()
        .await
        .expect_err("response slower than the timeout should fail");
    assert_eq!(error.code(), ErrorCode::Timeout);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interceptor_retries_transient_failures() {
    let server = MockServer::start(vec![
        MockResponse::new(503, Vec::<(String, String)>::new(), "busy", Duration::ZERO),
        MockResponse::new(
            200,
            vec![("Content-Type", "application/json")],
            r#"{"ok":true}"#,
            Duration::ZERO,
        ),
    ]);
    let client = client_for(&server);

    let decoded: Value = client
        .get("/v1/flaky")
        .interceptor(Arc::new(|attempt: &reqrun::AttemptRecord<'_>| {
            if attempt.retry_count == 0 && attempt.status.is_some_and(|status| status.as_u16() == 503)
            {
                InterceptionAction::Retry {
                    delay: Duration::from_millis(5),
                }
            } else {
                InterceptionAction::Continue
            }
        }))
        .send_json()
        .await
        .expect("request should succeed after one retry");
    assert_eq!(decoded["ok"], Value::Bool(true));
    assert_eq!(server.served_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn downloads_write_response_bytes_to_disk() {
    let payload = b"\x89PNG\r\n\x1a\n....image bytes....".to_vec();
    let server = MockServer::start(vec![MockResponse::new_bytes(
        200,
        Vec::<(String, String)>::new(),
        payload.clone(),
        Duration::ZERO,
    )]);
    let client = client_for(&server);

    let path = std::env::temp_dir().join(format!(
        "reqrun-download-{}-{}.bin",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock should be past the epoch")
            .as_nanos()
    ));
    let written = client
        .get("/v1/file")
        .download(&path, None)
        .await
        .expect("download should succeed");
    assert_eq!(written, payload.len() as u64);

    let on_disk = std::fs::read(&path).expect("downloaded file should exist");
    assert_eq!(on_disk, payload);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bodiless_statuses_pass_the_empty_body_check() {
    let server = MockServer::start(vec![MockResponse::new(
        204,
        Vec::<(String, String)>::new(),
        "",
        Duration::ZERO,
    )]);
    let client = client_for(&server);

    let response = client
        .delete("/v1/items/7")
        .allow_empty_body(false)
        .send()
        .await
        .expect("a 204 reply carries no body by definition");
    assert_eq!(response.status().as_u16(), 204);
    assert!(response.body().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_reports_request_body_progress() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        r#"{"ok":true}"#,
        Duration::ZERO,
    )]);
    let client = client_for(&server);

    let ticks: Arc<Mutex<Vec<(u64, Option<u64>, f64)>>> = Arc::new(Mutex::new(Vec::new()));
    let tick_log = Arc::clone(&ticks);
    let progress: reqrun::ProgressHandler = Arc::new(move |sent, total, fraction| {
        tick_log
            .lock()
            .expect("lock progress ticks")
            .push((sent, total, fraction));
    });

    let response = client
        .post("/v1/blobs")
        .body_encoding(BodyEncoding::Json)
        .param("data", "d".repeat(10 * 1024))
        .upload(progress)
        .await
        .expect("upload should succeed");
    assert_eq!(response.status().as_u16(), 200);

    let ticks = ticks.lock().expect("lock progress ticks").clone();
    assert!(!ticks.is_empty(), "sending a body must tick at least once");
    assert!(
        ticks.windows(2).all(|pair| pair[0].0 < pair[1].0),
        "sent byte counts must be monotonic"
    );
    let last = ticks.last().expect("ticks recorded");
    assert_eq!(Some(last.0), last.1, "the final tick covers the whole body");
    assert_eq!(last.2, 1.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_progress_ticks_track_received_bytes() {
    let payload = vec![0xAB_u8; 96 * 1024];
    let server = MockServer::start(vec![MockResponse::new_bytes(
        200,
        Vec::<(String, String)>::new(),
        payload.clone(),
        Duration::ZERO,
    )]);
    let client = client_for(&server);

    let ticks: Arc<Mutex<Vec<(u64, Option<u64>, f64)>>> = Arc::new(Mutex::new(Vec::new()));
    let tick_log = Arc::clone(&ticks);
    let progress: reqrun::ProgressHandler = Arc::new(move |received, total, fraction| {
        tick_log
            .lock()
            .expect("lock progress ticks")
            .push((received, total, fraction));
    });
    let path = std::env::temp_dir().join(format!(
        "reqrun-progress-{}-{}.bin",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock should be past the epoch")
            .as_nanos()
    ));

    let written = client
        .get("/v1/file")
        .download(&path, Some(progress))
        .await
        .expect("download should succeed");
    assert_eq!(written, payload.len() as u64);
    let _ = std::fs::remove_file(&path);

    let total = payload.len() as u64;
    let ticks = ticks.lock().expect("lock progress ticks").clone();
    assert!(!ticks.is_empty(), "receiving a body must tick at least once");
    assert!(
        ticks.windows(2).all(|pair| pair[0].0 <= pair[1].0),
        "received byte counts must be monotonic"
    );
    assert!(ticks.iter().all(|(_, reported, _)| *reported == Some(total)));
    let last = ticks.last().expect("ticks recorded");
    assert_eq!(last.0, total);
    assert_eq!(last.2, 1.0);
}
