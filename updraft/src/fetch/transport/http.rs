//! HTTP(S) transport with Range-based resume.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::{RemoteInfo, TransferStream, Transport};
use crate::config::Credentials;
use crate::fetch::error::{FetchError, FetchResult};
use crate::fetch::filename::content_disposition_filename;
use crate::fetch::url::redacted;

/// HTTP transport bound to one client (proxied or direct).
pub(crate) struct HttpTransport<'a> {
    client: &'a Client,
    credentials: Option<&'a Credentials>,
}

impl<'a> HttpTransport<'a> {
    pub(crate) fn new(client: &'a Client, credentials: Option<&'a Credentials>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    /// Strip userinfo from the URL and attach credentials as basic auth.
    ///
    /// Credentials embedded in the URL take precedence over configured ones.
    fn authorized(&self, url: &Url, build: impl FnOnce(Url) -> RequestBuilder) -> RequestBuilder {
        if !url.username().is_empty() {
            let username = url.username().to_string();
            let password = url.password().map(str::to_string);
            let mut bare = url.clone();
            let _ = bare.set_username("");
            let _ = bare.set_password(None);
            return build(bare).basic_auth(username, password);
        }
        let request = build(url.clone());
        match self.credentials {
            Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
            None => request,
        }
    }
}

impl Transport for HttpTransport<'_> {
    fn probe(&self, url: &Url) -> FetchResult<RemoteInfo> {
        let head = self
            .authorized(url, |u| self.client.head(u))
            .send()
            .map_err(|e| send_error(url, e))?;

        let mut filename = None;
        if head_unsupported(head.status()) {
            debug!(url = %redacted(url), status = %head.status(), "HEAD refused, probing with GET");
        } else {
            validate_response(url, &head)?;
            filename = disposition_filename(&head);
            if let Some(size) = content_length(&head) {
                return Ok(RemoteInfo {
                    size: Some(size),
                    filename,
                });
            }
            debug!(url = %redacted(url), "HEAD carried no length, probing with GET");
        }

        let probe = self.probe_with_get(url)?;
        Ok(RemoteInfo {
            size: probe.size,
            filename: probe.filename.or(filename),
        })
    }

    fn open(&self, url: &Url, offset: u64) -> FetchResult<TransferStream> {
        let mut request = self.authorized(url, |u| self.client.get(u));
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().map_err(|e| send_error(url, e))?;
        validate_response(url, &response)?;

        let resumed = offset == 0
            || (response.status() == StatusCode::PARTIAL_CONTENT
                && content_range_start(&response).map_or(true, |start| start == offset));

        Ok(TransferStream {
            reader: Box::new(response),
            resumed,
        })
    }
}

impl HttpTransport<'_> {
    /// Learn the size from a one-byte ranged GET. A 206 carries the total in
    /// `Content-Range`; a server that ignores the range reports the full
    /// length. The body is not read.
    fn probe_with_get(&self, url: &Url) -> FetchResult<RemoteInfo> {
        let response = self
            .authorized(url, |u| self.client.get(u))
            .header(RANGE, "bytes=0-0")
            .send()
            .map_err(|e| send_error(url, e))?;
        validate_response(url, &response)?;

        let size = if response.status() == StatusCode::PARTIAL_CONTENT {
            content_range_total(&response)
        } else {
            content_length(&response)
        };
        Ok(RemoteInfo {
            size,
            filename: disposition_filename(&response),
        })
    }
}

/// Statuses with which servers refuse HEAD while still serving GET.
fn head_unsupported(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    )
}

fn content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

fn disposition_filename(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(content_disposition_filename)
}

/// Reject responses that cannot be the requested file.
fn validate_response(url: &Url, response: &Response) -> FetchResult<()> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(FetchError::transport(redacted(url), "file not found (404)"));
    }
    if !status.is_success() {
        return Err(FetchError::transport(
            redacted(url),
            format!("server returned status {}", status),
        ));
    }

    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false);
    if is_html {
        return Err(FetchError::transport(
            redacted(url),
            "a web page was returned instead of the requested file",
        ));
    }
    Ok(())
}

/// First byte position from `Content-Range: bytes <start>-<end>/<total>`.
fn content_range_start(response: &Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    parse_content_range(value).map(|(start, _)| start)
}

/// Total size from `Content-Range`, unless the server reports `*`.
fn content_range_total(response: &Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    parse_content_range(value).and_then(|(_, total)| total)
}

fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let range = value.trim().strip_prefix("bytes")?.trim();
    let (span, total) = range.split_once('/').unwrap_or((range, "*"));
    let (start, _) = span.split_once('-')?;
    let start = start.trim().parse().ok()?;
    Some((start, total.trim().parse().ok()))
}

fn send_error(url: &Url, e: reqwest::Error) -> FetchError {
    let reason = if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    };
    FetchError::transport(redacted(url), reason)
}
