//! Shared fixtures for integration tests: a local HTTP origin with Range
//! support and a proxy that always fails.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tiny_http::{Header, Method, Request, Response, Server};

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[derive(Default)]
struct Origin {
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// Serve `Range` requests with 206; otherwise ignore them.
    honor_ranges: AtomicBool,
    /// Answer HEAD with 405, like presigned object-store URLs.
    reject_head: AtomicBool,
    bytes_served: AtomicU64,
    requests: AtomicUsize,
    range_headers: Mutex<Vec<String>>,
}

/// Handle to a background tiny_http server. Stops on drop.
pub struct TestServer {
    addr: SocketAddr,
    origin: Arc<Origin>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Origin serving registered files, with Range support.
    pub fn start() -> Self {
        let origin = Arc::new(Origin::default());
        origin.honor_ranges.store(true, Ordering::SeqCst);
        let handler_origin = Arc::clone(&origin);
        Self::spawn(origin, move |request| serve_file(&handler_origin, request))
    }

    /// Server answering every request with 502, like a broken proxy.
    pub fn failing_proxy() -> Self {
        let origin = Arc::new(Origin::default());
        let handler_origin = Arc::clone(&origin);
        Self::spawn(origin, move |request| {
            handler_origin.requests.fetch_add(1, Ordering::SeqCst);
            let _ = request.respond(Response::from_string("bad gateway").with_status_code(502));
        })
    }

    fn spawn(origin: Arc<Origin>, handle: impl Fn(Request) + Send + 'static) -> Self {
        let server = Server::http("127.0.0.1:0").expect("bind test server");
        let addr = server
            .server_addr()
            .to_ip()
            .expect("test server has an IP address");
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let thread = thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(request)) => handle(request),
                    Ok(None) => continue,
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            origin,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn add_file(&self, path: &str, body: impl Into<Vec<u8>>) {
        let key = format!("/{}", path.trim_start_matches('/'));
        self.origin.files.lock().insert(key, body.into());
    }

    pub fn set_honor_ranges(&self, honor: bool) {
        self.origin.honor_ranges.store(honor, Ordering::SeqCst);
    }

    pub fn set_reject_head(&self, reject: bool) {
        self.origin.reject_head.store(reject, Ordering::SeqCst);
    }

    /// Body bytes sent in GET responses.
    pub fn bytes_served(&self) -> u64 {
        self.origin.bytes_served.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.origin.requests.load(Ordering::SeqCst)
    }

    /// `Range` header values received, in order.
    pub fn range_headers(&self) -> Vec<String> {
        self.origin.range_headers.lock().clone()
    }

    pub fn reset_counters(&self) {
        self.origin.bytes_served.store(0, Ordering::SeqCst);
        self.origin.requests.store(0, Ordering::SeqCst);
        self.origin.range_headers.lock().clear();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("valid header")
}

fn serve_file(origin: &Origin, request: Request) {
    origin.requests.fetch_add(1, Ordering::SeqCst);
    if *request.method() == Method::Head && origin.reject_head.load(Ordering::SeqCst) {
        let _ = request.respond(Response::from_string("method not allowed").with_status_code(405));
        return;
    }

    let path = request.url().split('?').next().unwrap_or("").to_string();
    let Some(body) = origin.files.lock().get(&path).cloned() else {
        let _ = request.respond(Response::from_string("not found").with_status_code(404));
        return;
    };

    let range = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Range"))
        .map(|h| h.value.as_str().to_string());
    if let Some(range) = &range {
        origin.range_headers.lock().push(range.clone());
    }

    let span = range
        .as_deref()
        .filter(|_| origin.honor_ranges.load(Ordering::SeqCst))
        .and_then(|r| parse_range(r, body.len()));

    let content_type = header("Content-Type", "application/octet-stream");
    let (served, response) = match span {
        Some((start, end)) => {
            let content_range = format!("bytes {}-{}/{}", start, end, body.len());
            let part = body[start..=end].to_vec();
            let response = Response::from_data(part)
                .with_status_code(206)
                .with_header(header("Content-Range", &content_range));
            (end + 1 - start, response)
        }
        None => (body.len(), Response::from_data(body)),
    };
    // Always send Content-Length; tiny_http switches large bodies to chunked.
    let response = response
        .with_header(content_type)
        .with_chunked_threshold(usize::MAX);

    if *request.method() == Method::Get {
        origin.bytes_served.fetch_add(served as u64, Ordering::SeqCst);
    }
    let _ = request.respond(response);
}

/// Inclusive byte span of `bytes=<start>-[<end>]` within a body of `len` bytes.
fn parse_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    if start >= len {
        return None;
    }
    let end = match end.trim() {
        "" => len - 1,
        end => end.parse::<usize>().ok()?.min(len - 1),
    };
    (end >= start).then_some((start, end))
}
