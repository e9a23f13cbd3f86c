//! Resumable payload fetching.
//!
//! This module retrieves the update feed and the payload files named by
//! update tasks, including:
//! - URL resolution against a base (`url`)
//! - Per-scheme transports for HTTP(S), FTP and local files (`transport`)
//! - Resume decisions and the block transfer loop (`session`)
//! - SHA-256 checksums computed while downloading (`checksum`)
//! - ECDSA P-256 payload signatures (`signature`)
//! - Percentage progress with transfer rate (`progress`)
//! - Cooperative cancellation (`abort`)
//!
//! # Architecture
//!
//! ```text
//! Fetcher (trait)
//!     │
//!     └── ResumableFetcher
//!             │
//!             ├── proxy fallback (proxied client → direct client)
//!             │
//!             ├── DownloadSession (resume table, 4 KiB blocks)
//!             │       └── Transport (trait)
//!             │               ├── HttpTransport
//!             │               ├── FtpTransport
//!             │               └── FileTransport
//!             │
//!             ├── RollingChecksum / SignatureVerifier
//!             │
//!             └── AbortSignal
//! ```
//!
//! # Example
//!
//! ```ignore
//! use updraft::config::RunConfig;
//! use updraft::fetch::{FetchRequest, Fetcher, ResumableFetcher};
//!
//! let fetcher = ResumableFetcher::new("https://example.com/app/feed.json", &RunConfig::default())?;
//! let request = FetchRequest::new("bin/app.exe").with_checksum("9f86d0...");
//! let path = fetcher.fetch_data(&request, Some(&|p| println!("{}%", p.percentage)))?;
//! ```

mod abort;
mod checksum;
mod error;
mod filename;
mod progress;
mod resumable;
mod session;
mod signature;
mod transport;
mod url;

use std::path::PathBuf;

pub use abort::AbortSignal;
pub use checksum::{calculate_file_checksum, verify_checksum, RollingChecksum};
pub use error::{FetchError, FetchResult};
pub use filename::sanitize_filename;
pub use progress::{format_size, DownloadProgress, ProgressCallback, ProgressTracker, TransferRate};
pub use resumable::ResumableFetcher;
pub use session::BLOCK_SIZE;
pub use signature::SignatureVerifier;
pub use transport::RemoteInfo;
pub use url::{resolve_url, url_basename};

/// A payload to retrieve and the integrity data to check it against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest<'a> {
    /// Absolute URL, or a path relative to `base_url`.
    pub url: &'a str,
    /// Base for relative URLs. Defaults to the feed URL.
    pub base_url: Option<&'a str>,
    /// Expected SHA-256 of the payload, hex encoded.
    pub checksum: Option<&'a str>,
    /// Base64 ECDSA signature, checked when a verification key is configured.
    pub signature: Option<&'a str>,
}

impl<'a> FetchRequest<'a> {
    pub fn new(url: &'a str) -> Self {
        Self {
            url,
            base_url: None,
            checksum: None,
            signature: None,
        }
    }

    pub fn with_base_url(mut self, base_url: Option<&'a str>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_checksum(mut self, checksum: &'a str) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_signature(mut self, signature: &'a str) -> Self {
        self.signature = Some(signature);
        self
    }
}

/// Retrieves the update feed and the payloads it references.
///
/// Implementations must be safe to share across threads; a fetcher is
/// handed to every task during preparation.
pub trait Fetcher: Send + Sync {
    /// Retrieve the feed document as text.
    fn fetch_feed(&self) -> FetchResult<String>;

    /// Retrieve one payload into local staging and return its path.
    ///
    /// An interrupted transfer leaves a partial file that a later call for
    /// the same URL resumes from.
    fn fetch_data(
        &self,
        request: &FetchRequest<'_>,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> FetchResult<PathBuf>;
}
