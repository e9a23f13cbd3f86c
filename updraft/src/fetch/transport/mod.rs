//! Protocol transports behind a common session abstraction.
//!
//! Each transport answers two questions for the resume algorithm: how big is
//! the remote file, and can a read start at a given offset.
//!
//! ```text
//! Transport (trait)
//!     ├── HttpTransport   http://, https://  (reqwest blocking, Range)
//!     ├── FtpTransport    ftp://             (suppaftp, REST)
//!     └── FileTransport   file://            (std::fs, seek)
//! ```

mod file;
mod ftp;
mod http;

use std::io::Read;

use reqwest::Url;

use super::error::FetchResult;

pub(crate) use file::FileTransport;
pub(crate) use ftp::FtpTransport;
pub(crate) use http::HttpTransport;

/// What a transport learned about a remote file before transferring it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Content length, when the server reports one.
    pub size: Option<u64>,
    /// File name suggested by the server.
    pub filename: Option<String>,
}

/// An open response stream.
pub struct TransferStream {
    pub reader: Box<dyn Read>,
    /// `true` when the stream starts at the requested offset. `false` means
    /// the server ignored the offset and the stream starts at byte zero.
    pub resumed: bool,
}

impl std::fmt::Debug for TransferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStream")
            .field("resumed", &self.resumed)
            .finish_non_exhaustive()
    }
}

/// One protocol's view of the session abstraction.
pub(crate) trait Transport {
    /// Query size and suggested file name.
    fn probe(&self, url: &Url) -> FetchResult<RemoteInfo>;

    /// Open a stream starting at `offset`.
    fn open(&self, url: &Url, offset: u64) -> FetchResult<TransferStream>;
}
