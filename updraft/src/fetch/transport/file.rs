//! Local `file://` transport.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

use reqwest::Url;

use super::{RemoteInfo, TransferStream, Transport};
use crate::fetch::error::{FetchError, FetchResult};

/// Reads payloads from the local file system.
pub(crate) struct FileTransport;

impl FileTransport {
    fn local_path(url: &Url) -> FetchResult<PathBuf> {
        url.to_file_path()
            .map_err(|_| FetchError::transport(url.as_str(), "not a local file path"))
    }
}

impl Transport for FileTransport {
    fn probe(&self, url: &Url) -> FetchResult<RemoteInfo> {
        let path = Self::local_path(url)?;
        let metadata = path.metadata().map_err(|e| {
            FetchError::transport(url.as_str(), format!("cannot stat {}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(FetchError::transport(url.as_str(), "not a regular file"));
        }
        Ok(RemoteInfo {
            size: Some(metadata.len()),
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
        })
    }

    fn open(&self, url: &Url, offset: u64) -> FetchResult<TransferStream> {
        let path = Self::local_path(url)?;
        let mut file = File::open(&path).map_err(|e| {
            FetchError::transport(url.as_str(), format!("cannot open {}: {}", path.display(), e))
        })?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).map_err(|e| {
                FetchError::transport(url.as_str(), format!("cannot seek to {}: {}", offset, e))
            })?;
        }
        Ok(TransferStream {
            reader: Box::new(file),
            resumed: true,
        })
    }
}
