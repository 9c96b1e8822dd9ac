//! Shared test fixtures: a scripted in-process `JobApi` and a raw TCP mock of
//! the upstream thread response endpoint.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tenderbridge::dispatch::async_poll::Cadence;
use tenderbridge::dispatch::{FetchOptions, JobApi, JobHandle, JobStatusSnapshot};
use tenderbridge::error::BridgeError;
use tenderbridge::parsers;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ---------------------------------------------------------------------------
// Snapshots and cadence
// ---------------------------------------------------------------------------

pub fn running() -> JobStatusSnapshot {
    parsers::classify(serde_json::json!({"status": "running", "waited_seconds": 12}))
}

pub fn completed(content: &str) -> JobStatusSnapshot {
    parsers::classify(serde_json::json!({"status": "completed", "response": {"content": content}}))
}

pub fn failed() -> JobStatusSnapshot {
    parsers::classify(serde_json::json!({"status": "failed", "error": "worker crashed"}))
}

pub fn unknown() -> JobStatusSnapshot {
    parsers::normalize(Some("text/html"), b"<html>bad gateway</html>")
}

pub fn handle() -> JobHandle {
    JobHandle::new(Some("thread_1".to_string()), Some("proj_1".to_string())).unwrap()
}

/// Millisecond cadence so tests do not wait on the 5s/10s production pauses.
pub fn fast_cadence() -> Cadence {
    Cadence {
        standard_pause: Duration::from_millis(10),
        failed_pause: Duration::from_millis(20),
        wait_hint: Duration::from_secs(1),
        single_shot_wait_hint: Duration::from_secs(1),
        session_ceiling: None,
    }
}

// ---------------------------------------------------------------------------
// Scripted JobApi
// ---------------------------------------------------------------------------

/// Returns scripted results in order; once the script is exhausted every
/// further status call reports `running`.
#[derive(Default)]
pub struct ScriptedApi {
    script: Mutex<VecDeque<Result<JobStatusSnapshot, BridgeError>>>,
    submit_error: Mutex<Option<BridgeError>>,
    prompts: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    submits: AtomicUsize,
}

impl ScriptedApi {
    pub fn new(script: Vec<Result<JobStatusSnapshot, BridgeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn failing_submit(error: BridgeError) -> Self {
        Self {
            submit_error: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

pub fn http_error(status: u16) -> BridgeError {
    BridgeError::UpstreamStatus {
        status,
        body: "upstream exploded".to_string(),
    }
}

impl JobApi for ScriptedApi {
    async fn submit(&self, _handle: &JobHandle, prompt: &str) -> Result<(), BridgeError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.submit_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fetch_status(
        &self,
        _handle: &JobHandle,
        _options: &FetchOptions,
    ) -> Result<JobStatusSnapshot, BridgeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(running()))
    }
}

// ---------------------------------------------------------------------------
// Mock upstream HTTP server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: String,
}

impl MockResponse {
    pub fn json(body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some("application/json"),
            body: body.to_string(),
        }
    }

    pub fn event_stream(body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some("text/event-stream"),
            body: body.to_string(),
        }
    }

    pub fn with_status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: Some("application/json"),
            body: body.to_string(),
        }
    }

    pub fn with_content_type(content_type: &'static str, body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type),
            body: body.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path plus query string.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct MockState {
    submit: MockResponse,
    statuses: VecDeque<MockResponse>,
    last_status: Option<MockResponse>,
    requests: Vec<RecordedRequest>,
}

/// POSTs get the submit response; GETs walk the status script, repeating the
/// last entry once it runs out.
pub struct MockUpstream {
    pub base_url: String,
    state: Arc<Mutex<MockState>>,
}

impl MockUpstream {
    pub async fn start(statuses: Vec<MockResponse>) -> Self {
        Self::start_with_submit(MockResponse::json(r#"{"ok": true}"#), statuses).await
    }

    pub async fn start_with_submit(submit: MockResponse, statuses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(MockState {
            submit,
            statuses: statuses.into(),
            last_status: None,
            requests: Vec::new(),
        }));

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    serve_connection(socket, state).await;
                });
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            state,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests().iter().filter(|r| r.method == method).count()
    }
}

async fn serve_connection(mut socket: TcpStream, state: Arc<Mutex<MockState>>) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };

    let response = {
        let mut state = state.lock().unwrap();
        let response = if request.method == "POST" {
            state.submit.clone()
        } else {
            let next = state.statuses.pop_front();
            if let Some(r) = &next {
                state.last_status = Some(r.clone());
            }
            next.or_else(|| state.last_status.clone())
                .unwrap_or_else(|| MockResponse::json(r#"{"status": "running"}"#))
        };
        state.requests.push(request);
        response
    };

    let mut head = format!("HTTP/1.1 {} Mock\r\n", response.status);
    if let Some(ct) = response.content_type {
        head.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(response.body.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).into_owned();

    Some(RecordedRequest {
        method,
        target,
        headers,
        body,
    })
}
