use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::config::{ProviderConfig, VendorConfig};
use crate::core::error::ProviderError;
use crate::core::traits::Provider;
use crate::core::types::{Completion, CompletionOptions, CompletionRequest, Message, StreamChunk};

#[derive(Debug, Clone)]
pub(crate) struct MockResponse {
    pub status_code: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl MockResponse {
    pub fn json(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status_code: u16, body: &str) -> Self {
        Self {
            status_code,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn event_stream(events: &[&str]) -> Self {
        let body = events
            .iter()
            .map(|data| format!("data: {data}\n\n"))
            .collect::<String>();

        Self {
            status_code: 200,
            content_type: "text/event-stream",
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub request_line: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub fn path(&self) -> &str {
        self.request_line.split(' ').nth(1).unwrap_or_default()
    }

    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body should be json")
    }
}

/// Serves queued responses, one connection each, then exits.
pub(crate) struct MockServer {
    addr: std::net::SocketAddr,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    pub fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");

        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = Arc::clone(&captured);

        let handle = thread::spawn(move || {
            loop {
                let next_response = queue.lock().expect("queue lock").pop_front();
                let Some(response) = next_response else {
                    break;
                };

                let (mut stream, _) = listener.accept().expect("accept connection");
                stream
                    .set_read_timeout(Some(Duration::from_secs(3)))
                    .expect("set stream timeout");

                let raw = read_http_request(&mut stream);
                captured_clone
                    .lock()
                    .expect("capture lock")
                    .push(parse_request(&raw));

                stream
                    .write_all(build_http_response(&response).as_bytes())
                    .expect("write response");
                stream.flush().expect("flush response");
            }
        });

        Self {
            addr,
            captured,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.lock().expect("capture lock").clone()
    }

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("join mock server");
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_http_request(stream: &mut std::net::TcpStream) -> String {
    let mut request = Vec::new();
    let mut chunk = [0_u8; 1024];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(bytes_read) => {
                request.extend_from_slice(&chunk[..bytes_read]);

                if let Some(header_end) =
                    request.windows(4).position(|window| window == b"\r\n\r\n")
                {
                    let headers = String::from_utf8_lossy(&request[..header_end]).to_string();
                    let content_length = headers
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            if name.eq_ignore_ascii_case("content-length") {
                                value.trim().parse::<usize>().ok()
                            } else {
                                None
                            }
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            Err(error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.kind() == std::io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(error) => panic!("failed reading request: {error}"),
        }
    }

    String::from_utf8_lossy(&request).to_string()
}

fn parse_request(raw: &str) -> CapturedRequest {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();

    CapturedRequest {
        request_line,
        headers,
        body: body.to_string(),
    }
}

fn build_http_response(response: &MockResponse) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status_code,
        status_reason(response.status_code),
        response.content_type,
        response.body.len(),
        response.body,
    )
}

fn status_reason(status_code: u16) -> &'static str {
    match status_code {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Shared record of provider invocations, in call order.
pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn logged(log: &CallLog) -> Vec<String> {
    log.lock().expect("call log lock").clone()
}

#[derive(Debug, Clone)]
pub(crate) enum Script {
    Reply(String),
    Empty,
    Fail,
    Stream(Vec<String>),
    /// Streams the fragments, closes the stream, then reports a failure.
    StreamThenFail(Vec<String>),
}

/// Provider whose behaviour is fixed up front.
pub(crate) struct ScriptedProvider {
    name: String,
    config: ProviderConfig,
    script: Script,
    delay: Option<Duration>,
    available: bool,
    authenticates: bool,
    calls: AtomicUsize,
    log: CallLog,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Script, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            config: ProviderConfig::new(format!("{name}-id"), VendorConfig::Custom),
            script,
            delay: None,
            available: true,
            authenticates: true,
            calls: AtomicUsize::new(0),
            log: Arc::clone(log),
        }
    }

    pub fn reply(name: &str, text: &str, log: &CallLog) -> Self {
        Self::new(name, Script::Reply(text.to_string()), log)
    }

    pub fn failing(name: &str, log: &CallLog) -> Self {
        Self::new(name, Script::Fail, log)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn rejecting_auth(mut self) -> Self {
        self.authenticates = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn authenticate(&self) -> bool {
        self.authenticates
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn completion(
        &self,
        _request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().expect("call log lock").push(self.name.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.script {
            Script::Reply(text) => Ok(Completion::Message(Message::assistant(text.as_str()))),
            Script::Empty => Ok(Completion::Empty),
            Script::Fail => Err(ProviderError::Transport {
                provider: self.name.clone(),
                message: "connection refused".to_string(),
            }),
            Script::Stream(deltas) => {
                for delta in deltas {
                    if options.abort_requested() {
                        break;
                    }
                    options.emit(StreamChunk::Delta(delta.clone()));
                }
                options.emit(StreamChunk::Done);
                Ok(Completion::Streamed)
            }
            Script::StreamThenFail(deltas) => {
                for delta in deltas {
                    options.emit(StreamChunk::Delta(delta.clone()));
                }
                options.emit(StreamChunk::Done);
                Err(ProviderError::Transport {
                    provider: self.name.clone(),
                    message: "connection reset mid-stream".to_string(),
                })
            }
        }
    }
}
