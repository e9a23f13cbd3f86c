//! One resumable transfer of one URL.
//!
//! The session decides where a transfer starts:
//!
//! | remote size | local partial      | action                         |
//! |-------------|--------------------|--------------------------------|
//! | unknown     | any                | discard, full download         |
//! | S           | none / empty       | full download                  |
//! | S           | P == S             | already complete               |
//! | S           | P > S              | discard, full download         |
//! | S           | P < S              | ranged request from P          |
//! | S           | P < S, range denied| discard, restart from zero     |

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use reqwest::Url;
use tracing::{debug, info, warn};

use super::abort::AbortSignal;
use super::checksum::RollingChecksum;
use super::error::{FetchError, FetchResult};
use super::filename::{resolve_filename, url_key};
use super::progress::{ProgressCallback, ProgressTracker};
use super::transport::{TransferStream, Transport};
use super::url::redacted;

/// Transfer block size. Cancellation is observed between blocks.
pub const BLOCK_SIZE: usize = 4096;

/// An open download: destination, resume offset and response stream.
pub(crate) struct DownloadSession {
    url: String,
    dest: PathBuf,
    offset: u64,
    total: Option<u64>,
    stream: Option<(TransferStream, File)>,
}

impl DownloadSession {
    /// Probe the remote file and open a stream positioned per the resume rules.
    pub(crate) fn open(transport: &dyn Transport, url: &Url, work_dir: &Path) -> FetchResult<Self> {
        let info = transport.probe(url)?;
        let shown = redacted(url);

        let dir = work_dir.join(url_key(url));
        fs::create_dir_all(&dir).map_err(|e| FetchError::storage(&dir, e))?;
        let dest = dir.join(resolve_filename(info.filename.as_deref(), url));
        let existing = local_len(&dest)?;

        let Some(total) = info.size else {
            if existing.is_some() {
                info!(url = %shown, "Remote size unknown, discarding partial download");
            }
            return Self::start_fresh(transport, url, shown, dest, None);
        };

        match existing {
            Some(len) if len == total => {
                debug!(url = %shown, bytes = len, "Download already complete");
                Ok(Self {
                    url: shown,
                    dest,
                    offset: total,
                    total: Some(total),
                    stream: None,
                })
            }
            Some(len) if len > total => {
                warn!(
                    url = %shown,
                    local = len,
                    remote = total,
                    "Partial download larger than remote file, restarting"
                );
                Self::start_fresh(transport, url, shown, dest, Some(total))
            }
            Some(len) if len > 0 => {
                let stream = transport.open(url, len)?;
                if stream.resumed {
                    info!(url = %shown, offset = len, total, "Resuming download");
                    let file = OpenOptions::new()
                        .append(true)
                        .open(&dest)
                        .map_err(|e| FetchError::storage(&dest, e))?;
                    Ok(Self {
                        url: shown,
                        dest,
                        offset: len,
                        total: Some(total),
                        stream: Some((stream, file)),
                    })
                } else {
                    warn!(url = %shown, offset = len, "Server ignored resume request, restarting");
                    let file = create_file(&dest)?;
                    Ok(Self {
                        url: shown,
                        dest,
                        offset: 0,
                        total: Some(total),
                        stream: Some((stream, file)),
                    })
                }
            }
            _ => Self::start_fresh(transport, url, shown, dest, Some(total)),
        }
    }

    fn start_fresh(
        transport: &dyn Transport,
        url: &Url,
        shown: String,
        dest: PathBuf,
        total: Option<u64>,
    ) -> FetchResult<Self> {
        let stream = transport.open(url, 0)?;
        let file = create_file(&dest)?;
        Ok(Self {
            url: shown,
            dest,
            offset: 0,
            total,
            stream: Some((stream, file)),
        })
    }

    /// Byte offset the transfer starts from.
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Stream the remaining bytes to disk.
    ///
    /// On cancellation or a read failure the bytes received so far stay on
    /// disk so a later call can resume.
    pub(crate) fn transfer(
        self,
        mut checksum: Option<&mut RollingChecksum>,
        signal: &AbortSignal,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> FetchResult<PathBuf> {
        let Self {
            url,
            dest,
            offset,
            total,
            stream,
        } = self;

        if let Some(checksum) = checksum.as_mut() {
            if offset > 0 {
                checksum.seed_from_file(&dest, offset)?;
            }
        }

        let mut tracker = ProgressTracker::new(url.clone(), total, offset, Instant::now());

        let Some((mut stream, file)) = stream else {
            if let (Some(event), Some(callback)) = (tracker.record(offset, Instant::now()), on_progress) {
                callback(&event);
            }
            return Ok(dest);
        };

        let mut writer = BufWriter::new(file);
        let mut buffer = [0u8; BLOCK_SIZE];
        let mut downloaded = offset;

        loop {
            if signal.is_requested() {
                flush(&mut writer, &dest)?;
                info!(url = %url, bytes = downloaded, "Download cancelled, partial file kept");
                return Err(FetchError::Cancelled { url });
            }

            let read = match stream.reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    flush(&mut writer, &dest)?;
                    return Err(FetchError::transport(url, format!("read error: {}", e)));
                }
            };

            writer
                .write_all(&buffer[..read])
                .map_err(|e| FetchError::storage(&dest, e))?;
            if let Some(checksum) = checksum.as_mut() {
                checksum.update(&buffer[..read]);
            }
            downloaded += read as u64;

            if let Some(total) = total {
                if downloaded > total {
                    drop(writer);
                    let _ = fs::remove_file(&dest);
                    return Err(FetchError::transport(
                        url,
                        format!("received more than the reported {} bytes", total),
                    ));
                }
            }

            if let Some(event) = tracker.record(downloaded, Instant::now()) {
                if let Some(callback) = on_progress {
                    callback(&event);
                }
            }
        }

        flush(&mut writer, &dest)?;

        if let Some(total) = total {
            if downloaded < total {
                return Err(FetchError::transport(
                    url,
                    format!("connection closed after {} of {} bytes", downloaded, total),
                ));
            }
        }

        debug!(
            url = %url,
            bytes = downloaded - offset,
            rate = ?tracker.rate().map(|r| r.to_string()),
            "Transfer finished"
        );
        Ok(dest)
    }
}

fn local_len(path: &Path) -> FetchResult<Option<u64>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FetchError::storage(path, e)),
    }
}

fn create_file(path: &Path) -> FetchResult<File> {
    File::create(path).map_err(|e| FetchError::storage(path, e))
}

fn flush(writer: &mut BufWriter<File>, path: &Path) -> FetchResult<()> {
    writer.flush().map_err(|e| FetchError::storage(path, e))
}
