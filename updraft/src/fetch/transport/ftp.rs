//! FTP transport with REST-based resume.

use std::io::{self, Read};
use std::time::Duration;

use reqwest::Url;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::debug;

use super::{RemoteInfo, TransferStream, Transport};
use crate::config::Credentials;
use crate::fetch::error::{FetchError, FetchResult};
use crate::fetch::url::{percent_decode, redacted, url_basename};

const DEFAULT_FTP_PORT: u16 = 21;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// FTP transport. Each call opens its own control connection.
pub(crate) struct FtpTransport<'a> {
    credentials: Option<&'a Credentials>,
    timeout: Duration,
}

impl<'a> FtpTransport<'a> {
    pub(crate) fn new(credentials: Option<&'a Credentials>, timeout: Duration) -> Self {
        Self {
            credentials,
            timeout,
        }
    }

    fn connect(&self, url: &Url) -> FetchResult<FtpStream> {
        let addr = url
            .socket_addrs(|| Some(DEFAULT_FTP_PORT))
            .map_err(|e| FetchError::transport(redacted(url), format!("cannot resolve host: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::transport(redacted(url), "host resolved to no address"))?;

        let mut ftp = FtpStream::connect_timeout(addr, self.timeout)
            .map_err(|e| ftp_error(url, "connect", e))?;

        let (user, password) = if !url.username().is_empty() {
            (
                url.username().to_string(),
                url.password().unwrap_or_default().to_string(),
            )
        } else if let Some(creds) = self.credentials {
            (creds.username.clone(), creds.password.clone())
        } else {
            (ANONYMOUS_USER.to_string(), ANONYMOUS_PASSWORD.to_string())
        };

        ftp.login(user.as_str(), password.as_str())
            .map_err(|e| ftp_error(url, "login", e))?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| ftp_error(url, "TYPE I", e))?;
        Ok(ftp)
    }
}

impl Transport for FtpTransport<'_> {
    fn probe(&self, url: &Url) -> FetchResult<RemoteInfo> {
        let mut ftp = self.connect(url)?;
        // Servers without SIZE support leave the length unknown.
        let size = match ftp.size(remote_path(url).as_str()) {
            Ok(size) => Some(size as u64),
            Err(e) => {
                debug!(url = %url, error = %e, "FTP SIZE not available");
                None
            }
        };
        let _ = ftp.quit();
        Ok(RemoteInfo {
            size,
            filename: url_basename(url),
        })
    }

    fn open(&self, url: &Url, offset: u64) -> FetchResult<TransferStream> {
        let mut ftp = self.connect(url)?;

        let resumed = if offset == 0 {
            true
        } else {
            match ftp.resume_transfer(offset as usize) {
                Ok(()) => true,
                Err(e) => {
                    debug!(url = %url, offset, error = %e, "FTP REST rejected");
                    false
                }
            }
        };

        let data = ftp
            .retr_as_stream(remote_path(url).as_str())
            .map_err(|e| ftp_error(url, "RETR", e))?;

        Ok(TransferStream {
            reader: Box::new(FtpReader {
                ftp,
                data: Some(Box::new(data)),
                finished: false,
            }),
            resumed,
        })
    }
}

/// Data stream that closes its control connection when dropped.
struct FtpReader {
    ftp: FtpStream,
    data: Option<Box<dyn Read>>,
    finished: bool,
}

impl Read for FtpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(data) = self.data.as_mut() else {
            return Ok(0);
        };
        let read = data.read(buf)?;
        if read == 0 && !buf.is_empty() {
            self.finished = true;
        }
        Ok(read)
    }
}

impl Drop for FtpReader {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            if self.finished {
                if let Err(e) = self.ftp.finalize_retr_stream(data) {
                    debug!(error = %e, "FTP transfer did not finalize cleanly");
                }
            }
        }
        let _ = self.ftp.quit();
    }
}

/// Percent-decoded path relative to the login directory.
fn remote_path(url: &Url) -> String {
    let segments: Vec<String> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(percent_decode)
                .collect()
        })
        .unwrap_or_default();
    segments.join("/")
}

fn ftp_error(url: &Url, command: &str, e: FtpError) -> FetchError {
    FetchError::transport(redacted(url), format!("FTP {} failed: {}", command, e))
}
