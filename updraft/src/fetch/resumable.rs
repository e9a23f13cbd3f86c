//! The resumable, protocol-agnostic fetcher.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::{Proxy, Url};
use tracing::{debug, info, warn};

use super::abort::AbortSignal;
use super::checksum::{verify_checksum, RollingChecksum};
use super::error::{FetchError, FetchResult};
use super::progress::ProgressCallback;
use super::session::{DownloadSession, BLOCK_SIZE};
use super::signature::SignatureVerifier;
use super::transport::{FileTransport, FtpTransport, HttpTransport, Transport};
use super::url::{redacted, resolve_url};
use super::{FetchRequest, Fetcher};
use crate::config::{Credentials, RunConfig};

const USER_AGENT: &str = concat!("updraft/", env!("CARGO_PKG_VERSION"));

/// Which HTTP client an attempt goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Proxied,
    Direct,
}

/// Fetcher over HTTP(S), FTP and `file://` with resume and integrity checks.
///
/// Each instance stages payloads in its own work directory under the
/// configured temp root. A proxied attempt that fails with a transport error
/// is retried once without the proxy.
pub struct ResumableFetcher {
    feed_url: Url,
    direct: Client,
    proxied: Option<Client>,
    credentials: Option<Credentials>,
    timeout: Duration,
    work_dir: PathBuf,
    verifier: Option<SignatureVerifier>,
    signal: AbortSignal,
    open_sessions: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for ResumableFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableFetcher")
            .field("feed_url", &redacted(&self.feed_url))
            .field("proxied", &self.proxied.is_some())
            .field("work_dir", &self.work_dir)
            .field("verifies_signatures", &self.verifier.is_some())
            .finish()
    }
}

impl ResumableFetcher {
    /// Create a fetcher for the feed at `feed_url`.
    pub fn new(feed_url: &str, config: &RunConfig) -> FetchResult<Self> {
        Self::with_abort_signal(feed_url, config, AbortSignal::new())
    }

    /// Create a fetcher that observes an existing abort signal.
    pub fn with_abort_signal(
        feed_url: &str,
        config: &RunConfig,
        signal: AbortSignal,
    ) -> FetchResult<Self> {
        let feed_url = Url::parse(feed_url).map_err(|e| FetchError::UrlResolution {
            url: feed_url.to_string(),
            base_url: None,
            reason: format!("feed URL is not absolute: {}", e),
        })?;

        let direct = build_client(config.timeout, None)?;
        let proxied = config
            .proxy
            .as_deref()
            .map(|proxy| build_client(config.timeout, Some(proxy)))
            .transpose()?;

        let verifier = config
            .verification_key
            .as_deref()
            .map(SignatureVerifier::from_base64)
            .transpose()?;

        let dir_name = config
            .work_dir_name
            .clone()
            .unwrap_or_else(|| format!("fetch-{:016x}", rand::random::<u64>()));
        let work_dir = config.temp_root.join(dir_name);
        fs::create_dir_all(&work_dir).map_err(|e| FetchError::storage(&work_dir, e))?;
        debug!(work_dir = %work_dir.display(), "Fetcher work directory ready");

        Ok(Self {
            feed_url,
            direct,
            proxied,
            credentials: config.credentials.clone(),
            timeout: config.timeout,
            work_dir,
            verifier,
            signal,
            open_sessions: Mutex::new(HashSet::new()),
        })
    }

    /// Feed URL; also the default base for relative payload URLs.
    pub fn feed_url(&self) -> &Url {
        &self.feed_url
    }

    /// Directory holding this fetcher's staged and partial payloads.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// The abort signal observed by this fetcher's transfers.
    pub fn abort_signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Base for payload URLs. A relative base is read relative to the feed
    /// document; one that still does not resolve is passed through so the
    /// resolution error names it.
    fn base_for<'a>(&self, base_url: Option<&'a str>) -> Cow<'a, str> {
        match base_url {
            None => Cow::Owned(self.feed_url.to_string()),
            Some(base) if Url::parse(base).is_ok() => Cow::Borrowed(base),
            Some(base) => match resolve_url(base, Some(self.feed_url.as_str())) {
                Ok(resolved) => {
                    debug!(base_url = base, resolved = %redacted(&resolved), "Resolved relative base URL");
                    Cow::Owned(resolved.to_string())
                }
                Err(_) => Cow::Borrowed(base),
            },
        }
    }

    fn transport(&self, url: &Url, route: Route) -> FetchResult<Box<dyn Transport + '_>> {
        match url.scheme() {
            "http" | "https" => {
                let client = match route {
                    Route::Proxied => self.proxied.as_ref().unwrap_or(&self.direct),
                    Route::Direct => &self.direct,
                };
                Ok(Box::new(HttpTransport::new(client, self.credentials.as_ref())))
            }
            "ftp" => Ok(Box::new(FtpTransport::new(
                self.credentials.as_ref(),
                self.timeout,
            ))),
            "file" => Ok(Box::new(FileTransport)),
            other => Err(FetchError::UrlResolution {
                url: redacted(url),
                base_url: None,
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    /// Run `attempt` through the proxy, falling back to a direct attempt once.
    fn with_proxy_fallback<T>(
        &self,
        url: &Url,
        attempt: impl Fn(&dyn Transport) -> FetchResult<T>,
    ) -> FetchResult<T> {
        let proxied = self.proxied.is_some() && matches!(url.scheme(), "http" | "https");
        if !proxied {
            return attempt(self.transport(url, Route::Direct)?.as_ref());
        }

        match attempt(self.transport(url, Route::Proxied)?.as_ref()) {
            Err(e) if e.is_transient() => {
                warn!(url = %redacted(url), error = %e, "Proxied request failed, retrying without proxy");
                attempt(self.transport(url, Route::Direct)?.as_ref())
            }
            other => other,
        }
    }

    fn claim(&self, url: &Url) -> FetchResult<SessionClaim<'_>> {
        let key = url.to_string();
        if !self.open_sessions.lock().insert(key.clone()) {
            return Err(FetchError::SessionBusy {
                url: redacted(url),
            });
        }
        Ok(SessionClaim {
            sessions: &self.open_sessions,
            key,
        })
    }

    fn download(
        &self,
        transport: &dyn Transport,
        url: &Url,
        request: &FetchRequest<'_>,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> FetchResult<PathBuf> {
        let session = DownloadSession::open(transport, url, &self.work_dir)?;
        let mut checksum = request.checksum.map(|_| RollingChecksum::new());
        let dest = session.transfer(checksum.as_mut(), &self.signal, on_progress)?;

        let filename = dest
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        if let (Some(expected), Some(rolling)) = (request.checksum, checksum.as_ref()) {
            if let Err(e) = verify_checksum(&filename, expected, &rolling.hex()) {
                warn!(url = %redacted(url), error = %e, "Discarding payload with bad checksum");
                let _ = fs::remove_file(&dest);
                return Err(e);
            }
        }

        if let Some(verifier) = &self.verifier {
            verifier.verify_file(&dest, request.signature)?;
        }

        info!(url = %redacted(url), path = %dest.display(), "Payload ready");
        Ok(dest)
    }
}

impl Fetcher for ResumableFetcher {
    fn fetch_feed(&self) -> FetchResult<String> {
        let _active = self.signal.enter();
        let url = &self.feed_url;
        if self.signal.is_requested() {
            return Err(FetchError::Cancelled { url: redacted(url) });
        }

        let bytes = self.with_proxy_fallback(url, |transport| {
            let mut stream = transport.open(url, 0)?;
            read_to_end(&mut stream.reader, url, &self.signal)
        })?;

        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|_| FetchError::transport(redacted(url), "feed is not valid UTF-8"))?;
        debug!(url = %redacted(url), bytes = text.len(), "Feed retrieved");
        Ok(text)
    }

    fn fetch_data(
        &self,
        request: &FetchRequest<'_>,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> FetchResult<PathBuf> {
        let base = self.base_for(request.base_url);
        let url = resolve_url(request.url, Some(&base))?;

        let _claim = self.claim(&url)?;
        let _active = self.signal.enter();
        if self.signal.is_requested() {
            return Err(FetchError::Cancelled { url: redacted(&url) });
        }

        self.with_proxy_fallback(&url, |transport| {
            self.download(transport, &url, request, on_progress)
        })
    }
}

/// Marks a URL as having an open session until dropped.
struct SessionClaim<'a> {
    sessions: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for SessionClaim<'_> {
    fn drop(&mut self) {
        self.sessions.lock().remove(&self.key);
    }
}

fn read_to_end(reader: &mut dyn Read, url: &Url, signal: &AbortSignal) -> FetchResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buffer = [0u8; BLOCK_SIZE];
    loop {
        if signal.is_requested() {
            return Err(FetchError::Cancelled { url: redacted(url) });
        }
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(out),
            Ok(n) => out.extend_from_slice(&buffer[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(FetchError::transport(
                    redacted(url),
                    format!("read error: {}", e),
                ))
            }
        }
    }
}

fn build_client(timeout: Duration, proxy: Option<&str>) -> FetchResult<Client> {
    let builder = Client::builder()
        .connect_timeout(timeout)
        .timeout(None::<Duration>)
        .user_agent(USER_AGENT);

    let builder = match proxy {
        Some(proxy) => builder.proxy(Proxy::all(proxy).map_err(|e| {
            FetchError::Configuration(format!("invalid proxy '{}': {}", proxy, e))
        })?),
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| FetchError::Configuration(format!("cannot create HTTP client: {}", e)))
}
