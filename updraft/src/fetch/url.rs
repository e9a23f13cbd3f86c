//! URL resolution for feed-relative payload locations.

use reqwest::Url;

use super::error::{FetchError, FetchResult};

/// Resolve `url` against `base_url`.
///
/// Absolute URLs are returned unchanged. A relative URL needs an absolute
/// base. When the base does not end in `/`, its final segment is treated as a
/// file name (and dropped) if it contains a dot, otherwise as a directory.
/// Backslashes in relative locations are read as path separators.
pub fn resolve_url(url: &str, base_url: Option<&str>) -> FetchResult<Url> {
    if let Ok(absolute) = Url::parse(url) {
        return Ok(absolute);
    }

    let error = |reason: &str| FetchError::UrlResolution {
        url: url.to_string(),
        base_url: base_url.map(str::to_string),
        reason: reason.to_string(),
    };

    let base = base_url.ok_or_else(|| error("relative URL without a base URL"))?;
    let mut base = Url::parse(base).map_err(|_| error("base URL is not absolute"))?;
    if base.cannot_be_a_base() {
        return Err(error("base URL cannot carry a path"));
    }

    let path = base.path().to_string();
    if !path.ends_with('/') {
        let (parent, last) = path.rsplit_once('/').unwrap_or(("", path.as_str()));
        if last.contains('.') {
            base.set_path(&format!("{}/", parent));
        } else {
            base.set_path(&format!("{}/", path));
        }
    }
    base.set_query(None);
    base.set_fragment(None);

    let relative = url.replace('\\', "/");
    base.join(&relative).map_err(|e| error(&e.to_string()))
}

/// Last non-empty path segment of `url`, if any.
pub fn url_basename(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .map(|segment| percent_decode(segment))
}

/// URL string safe for logs and errors.
pub(crate) fn redacted(url: &Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut clean = url.clone();
    let _ = clean.set_password(Some("***"));
    clean.to_string()
}

pub(crate) fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &segment[i + 1..i + 3];
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
