//! Error types for the resumable fetcher.

use std::io;
use std::path::PathBuf;

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors that can occur while retrieving feeds and payloads.
#[derive(Debug)]
pub enum FetchError {
    /// A relative URL could not be resolved against its base.
    UrlResolution {
        url: String,
        base_url: Option<String>,
        reason: String,
    },

    /// Network or protocol failure. The only retryable kind.
    Transport { url: String, reason: String },

    /// Checksum or signature verification failed.
    Integrity { filename: String, reason: String },

    /// The transfer observed an abort request.
    Cancelled { url: String },

    /// Local staging failed (temp directory or partial file).
    Storage { path: PathBuf, source: io::Error },

    /// A download session for this URL is already open on this fetcher.
    SessionBusy { url: String },

    /// The fetcher was constructed with unusable settings.
    Configuration(String),
}

impl FetchError {
    pub(crate) fn transport(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry of the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Whether this error is the result of an abort request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UrlResolution {
                url,
                base_url: Some(base),
                reason,
            } => write!(f, "cannot resolve '{}' against '{}': {}", url, base, reason),
            Self::UrlResolution {
                url,
                base_url: None,
                reason,
            } => write!(f, "cannot resolve '{}': {}", url, reason),
            Self::Transport { url, reason } => {
                write!(f, "failed to retrieve {}: {}", url, reason)
            }
            Self::Integrity { filename, reason } => {
                write!(f, "integrity check failed for {}: {}", filename, reason)
            }
            Self::Cancelled { url } => write!(f, "download of {} was cancelled", url),
            Self::Storage { path, source } => {
                write!(f, "failed to stage {}: {}", path.display(), source)
            }
            Self::SessionBusy { url } => {
                write!(f, "a download of {} is already in progress", url)
            }
            Self::Configuration(msg) => write!(f, "invalid fetcher configuration: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage { source, .. } => Some(source),
            _ => None,
        }
    }
}
