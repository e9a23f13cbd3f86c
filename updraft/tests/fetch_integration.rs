//! Integration tests for the resumable fetcher against a local HTTP origin.
//!
//! Run with: `cargo test --test fetch_integration`

mod common;

use std::fs::{self, OpenOptions};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use tempfile::TempDir;

use common::{payload, sha256_hex, TestServer};
use updraft::config::RunConfig;
use updraft::fetch::{AbortSignal, DownloadProgress, FetchError, FetchRequest, Fetcher, ResumableFetcher};

const TEN_MIB: usize = 10 * 1024 * 1024;
const RESUME_OFFSET: u64 = 4_194_304;

fn config(temp: &TempDir) -> RunConfig {
    RunConfig::new(temp.path())
        .with_temp_root(temp.path().join("tmp"))
        .with_work_dir_name("work")
        .with_timeout(Duration::from_secs(10))
}

fn truncate(path: &std::path::Path, len: u64) {
    OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_len(len)
        .unwrap();
}

// ============================================================================
// Resume
// ============================================================================

#[test]
fn test_resume_requests_only_missing_bytes() {
    let server = TestServer::start();
    let body = payload(TEN_MIB);
    let checksum = sha256_hex(&body);
    server.add_file("app/app.bin", body.clone());

    let temp = TempDir::new().unwrap();
    let feed = server.url("app/feed.json");
    let request = FetchRequest::new("app.bin").with_checksum(&checksum);

    let first = ResumableFetcher::new(&feed, &config(&temp)).unwrap();
    let path = first.fetch_data(&request, None).unwrap();
    drop(first);

    // Simulate an interrupted earlier run.
    truncate(&path, RESUME_OFFSET);
    server.reset_counters();

    let second = ResumableFetcher::new(&feed, &config(&temp)).unwrap();
    let events = parking_lot::Mutex::new(Vec::new());
    let on_progress = |p: &DownloadProgress| events.lock().push(p.percentage);
    let resumed = second.fetch_data(&request, Some(&on_progress)).unwrap();

    assert_eq!(resumed, path);
    assert_eq!(server.range_headers(), [format!("bytes={}-", RESUME_OFFSET)]);
    assert_eq!(server.bytes_served(), TEN_MIB as u64 - RESUME_OFFSET);
    assert_eq!(fs::read(&resumed).unwrap(), body);

    let events = events.lock();
    assert!(events.windows(2).all(|w| w[0] < w[1]), "percentages must increase");
    assert_eq!(events.last(), Some(&100));
    assert!(events.first().is_some_and(|p| *p >= 40));
}

#[test]
fn test_server_without_range_support_restarts_from_zero() {
    let server = TestServer::start();
    let body = payload(512 * 1024);
    server.add_file("app.bin", body.clone());
    let temp = TempDir::new().unwrap();
    let feed = server.url("feed.json");
    let checksum = sha256_hex(&body);
    let request = FetchRequest::new("app.bin").with_checksum(&checksum);

    let path = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&request, None)
        .unwrap();
    truncate(&path, 1000);
    server.set_honor_ranges(false);
    server.reset_counters();

    let again = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&request, None)
        .unwrap();

    assert_eq!(server.range_headers(), ["bytes=1000-"]);
    assert_eq!(server.bytes_served(), body.len() as u64);
    assert_eq!(fs::read(again).unwrap(), body);
}

#[test]
fn test_oversized_partial_is_discarded() {
    let server = TestServer::start();
    let body = payload(64 * 1024);
    server.add_file("app.bin", body.clone());
    let temp = TempDir::new().unwrap();
    let feed = server.url("feed.json");
    let request = FetchRequest::new("app.bin");

    let path = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&request, None)
        .unwrap();
    fs::write(&path, payload(100 * 1024)).unwrap();
    server.reset_counters();

    let again = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&request, None)
        .unwrap();

    assert!(server.range_headers().is_empty());
    assert_eq!(fs::read(again).unwrap(), body);
}

#[test]
fn test_complete_file_is_not_downloaded_again() {
    let server = TestServer::start();
    let body = payload(32 * 1024);
    server.add_file("app.bin", body.clone());
    let temp = TempDir::new().unwrap();
    let feed = server.url("feed.json");
    let checksum = sha256_hex(&body);
    let request = FetchRequest::new("app.bin").with_checksum(&checksum);

    ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&request, None)
        .unwrap();
    server.reset_counters();

    let path = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&request, None)
        .unwrap();

    assert_eq!(server.bytes_served(), 0);
    assert_eq!(fs::read(path).unwrap(), body);
}

#[test]
fn test_head_refused_sizes_from_ranged_get() {
    let server = TestServer::start();
    server.set_reject_head(true);
    let body = payload(256 * 1024);
    server.add_file("app.bin", body.clone());
    let temp = TempDir::new().unwrap();
    let feed = server.url("feed.json");
    let checksum = sha256_hex(&body);
    let request = FetchRequest::new("app.bin").with_checksum(&checksum);

    let path = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&request, None)
        .unwrap();
    assert_eq!(fs::read(&path).unwrap(), body);

    truncate(&path, 100_000);
    server.reset_counters();
    let again = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&request, None)
        .unwrap();

    assert_eq!(server.range_headers(), ["bytes=0-0", "bytes=100000-"]);
    assert_eq!(server.bytes_served(), 1 + body.len() as u64 - 100_000);
    assert_eq!(fs::read(again).unwrap(), body);
}

#[test]
fn test_head_refused_and_ranges_ignored_uses_full_length() {
    let server = TestServer::start();
    server.set_reject_head(true);
    server.set_honor_ranges(false);
    let body = payload(64 * 1024);
    server.add_file("app.bin", body.clone());
    let temp = TempDir::new().unwrap();
    let feed = server.url("feed.json");

    let path = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&FetchRequest::new("app.bin"), None)
        .unwrap();
    assert_eq!(fs::read(&path).unwrap(), body);

    // The size is known, so a complete local file is not fetched again.
    server.reset_counters();
    let again = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&FetchRequest::new("app.bin"), None)
        .unwrap();
    assert_eq!(server.range_headers(), ["bytes=0-0"]);
    assert_eq!(fs::read(again).unwrap(), body);
}

// ============================================================================
// Integrity
// ============================================================================

#[test]
fn test_checksum_mismatch_is_integrity_error_and_not_resumed() {
    let server = TestServer::start();
    let body = payload(128 * 1024);
    server.add_file("app.bin", body.clone());
    let temp = TempDir::new().unwrap();
    let feed = server.url("feed.json");

    let fetcher = ResumableFetcher::new(&feed, &config(&temp)).unwrap();
    let wrong = sha256_hex(b"something else");
    let err = fetcher
        .fetch_data(&FetchRequest::new("app.bin").with_checksum(&wrong), None)
        .unwrap_err();
    match &err {
        FetchError::Integrity { reason, .. } => assert!(reason.contains(&sha256_hex(&body))),
        other => panic!("Expected Integrity error, got {:?}", other),
    }

    server.reset_counters();
    let checksum = sha256_hex(&body);
    let path = fetcher
        .fetch_data(&FetchRequest::new("app.bin").with_checksum(&checksum), None)
        .unwrap();
    assert!(server.range_headers().is_empty());
    assert_eq!(server.bytes_served(), body.len() as u64);
    assert_eq!(fs::read(path).unwrap(), body);
}

#[test]
fn test_checksum_is_case_insensitive() {
    let server = TestServer::start();
    let body = payload(4096 * 3 + 17);
    server.add_file("app.bin", body.clone());
    let temp = TempDir::new().unwrap();

    let upper = sha256_hex(&body).to_uppercase();
    ResumableFetcher::new(&server.url("feed.json"), &config(&temp))
        .unwrap()
        .fetch_data(&FetchRequest::new("app.bin").with_checksum(&upper), None)
        .unwrap();
}

#[test]
fn test_signed_payloads() {
    let server = TestServer::start();
    let body = payload(20_000);
    server.add_file("app.bin", body.clone());

    let key = SigningKey::from_slice(&[0x42u8; 32]).unwrap();
    let public = STANDARD.encode(key.verifying_key().to_encoded_point(false).as_bytes());
    let signature: Signature = key.sign(&body);
    let good = STANDARD.encode(signature.to_bytes());
    let bad_signature: Signature = key.sign(b"tampered");
    let bad = STANDARD.encode(bad_signature.to_bytes());

    let temp = TempDir::new().unwrap();
    let config = config(&temp).with_verification_key(public);
    let fetcher = ResumableFetcher::new(&server.url("feed.json"), &config).unwrap();

    fetcher
        .fetch_data(&FetchRequest::new("app.bin").with_signature(&good), None)
        .unwrap();

    let err = fetcher
        .fetch_data(&FetchRequest::new("app.bin").with_signature(&bad), None)
        .unwrap_err();
    assert!(matches!(err, FetchError::Integrity { .. }));

    let err = fetcher
        .fetch_data(&FetchRequest::new("app.bin"), None)
        .unwrap_err();
    assert!(matches!(err, FetchError::Integrity { ref reason, .. } if reason.contains("not signed")));
}

// ============================================================================
// Abort
// ============================================================================

#[test]
fn test_abort_keeps_partial_for_next_run() {
    let server = TestServer::start();
    let body = payload(2 * 1024 * 1024);
    server.add_file("app.bin", body.clone());
    let temp = TempDir::new().unwrap();
    let feed = server.url("feed.json");
    let checksum = sha256_hex(&body);
    let request = FetchRequest::new("app.bin").with_checksum(&checksum);

    let signal = AbortSignal::new();
    let fetcher = ResumableFetcher::with_abort_signal(&feed, &config(&temp), signal.clone()).unwrap();
    let trigger = signal.clone();
    let on_progress = move |p: &DownloadProgress| {
        if p.percentage >= 25 {
            trigger.request();
        }
    };
    let err = fetcher.fetch_data(&request, Some(&on_progress)).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(signal.active_operations(), 0);
    drop(fetcher);

    server.reset_counters();
    let path = ResumableFetcher::new(&feed, &config(&temp))
        .unwrap()
        .fetch_data(&request, None)
        .unwrap();

    let ranges = server.range_headers();
    assert_eq!(ranges.len(), 1, "second run should resume");
    assert!(server.bytes_served() < body.len() as u64);
    assert_eq!(fs::read(path).unwrap(), body);
}

#[test]
fn test_abort_from_another_thread_waits_for_transfer() {
    let server = TestServer::start();
    let body = payload(TEN_MIB);
    server.add_file("big.bin", body);
    let temp = TempDir::new().unwrap();

    let signal = AbortSignal::new();
    let fetcher =
        ResumableFetcher::with_abort_signal(&server.url("feed.json"), &config(&temp), signal.clone())
            .unwrap();

    std::thread::scope(|scope| {
        let worker = scope.spawn(|| fetcher.fetch_data(&FetchRequest::new("big.bin"), None));
        while signal.active_operations() == 0 && !worker.is_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }
        signal.request();
        signal.wait_idle();
        assert_eq!(signal.active_operations(), 0);

        match worker.join().unwrap() {
            Ok(_) => {} // finished before the request was observed
            Err(e) => assert!(e.is_cancelled(), "unexpected error: {}", e),
        }
    });
}

// ============================================================================
// Transport
// ============================================================================

#[test]
fn test_feed_fetch_strips_bom() {
    let server = TestServer::start();
    let mut feed = b"\xEF\xBB\xBF".to_vec();
    feed.extend_from_slice(br#"{"tasks":[]}"#);
    server.add_file("feed.json", feed);
    let temp = TempDir::new().unwrap();

    let text = ResumableFetcher::new(&server.url("feed.json"), &config(&temp))
        .unwrap()
        .fetch_feed()
        .unwrap();
    assert_eq!(text, r#"{"tasks":[]}"#);
}

#[test]
fn test_missing_file_is_transport_error() {
    let server = TestServer::start();
    let temp = TempDir::new().unwrap();
    let err = ResumableFetcher::new(&server.url("feed.json"), &config(&temp))
        .unwrap()
        .fetch_feed()
        .unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("404"));
}

#[test]
fn test_failing_proxy_falls_back_to_direct() {
    let origin = TestServer::start();
    let proxy = TestServer::failing_proxy();
    let body = payload(10_000);
    origin.add_file("feed.json", br#"{"tasks":[]}"#.to_vec());
    origin.add_file("app.bin", body.clone());
    let temp = TempDir::new().unwrap();
    let config = config(&temp).with_proxy(proxy.base_url());

    let fetcher = ResumableFetcher::new(&origin.url("feed.json"), &config).unwrap();
    assert_eq!(fetcher.fetch_feed().unwrap(), r#"{"tasks":[]}"#);
    let path = fetcher.fetch_data(&FetchRequest::new("app.bin"), None).unwrap();

    assert_eq!(fs::read(path).unwrap(), body);
    assert!(proxy.requests() >= 2, "each fetch should try the proxy first");
}

#[test]
fn test_relative_url_uses_base_url() {
    let server = TestServer::start();
    server.add_file("cdn/v2/app.bin", b"from cdn".to_vec());
    let temp = TempDir::new().unwrap();
    let base = server.url("cdn/v2/");

    let path = ResumableFetcher::new(&server.url("feeds/feed.json"), &config(&temp))
        .unwrap()
        .fetch_data(&FetchRequest::new("app.bin").with_base_url(Some(base.as_str())), None)
        .unwrap();
    assert_eq!(fs::read(path).unwrap(), b"from cdn");
}
