//! File name selection for staged payloads.

use reqwest::Url;
use sha2::{Digest, Sha256};

use super::url::url_basename;

/// Characters never allowed in a staged file name on any supported platform.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Pick a file name for a payload.
///
/// Order: server-supplied name, URL basename, generated name. The chosen name
/// is stripped of characters invalid on any platform.
pub fn resolve_filename(header_name: Option<&str>, url: &Url) -> String {
    header_name
        .map(sanitize_filename)
        .filter(|name| is_usable(name))
        .or_else(|| {
            url_basename(url)
                .map(|name| sanitize_filename(&name))
                .filter(|name| is_usable(name))
        })
        .unwrap_or_else(|| generated_name(url))
}

/// Extract `filename=` from a `Content-Disposition` header value.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|part| {
        let (key, value) = part.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Remove characters that are invalid in file names.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && !INVALID_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Short stable key for a URL, used to separate payloads in the work dir.
pub fn url_key(url: &Url) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

fn is_usable(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".."
}

fn generated_name(url: &Url) -> String {
    format!("download-{}.tmp", url_key(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_header_name_wins() {
        let name = resolve_filename(Some("setup.exe"), &url("http://h/dl?id=5"));
        assert_eq!(name, "setup.exe");
    }

    #[test]
    fn test_falls_back_to_url_basename() {
        let name = resolve_filename(None, &url("http://h/files/app.bin"));
        assert_eq!(name, "app.bin");
    }

    #[test]
    fn test_generated_when_nothing_usable() {
        let name = resolve_filename(Some("???"), &url("http://h/"));
        assert!(name.starts_with("download-"));
        assert!(name.ends_with(".tmp"));
        assert_eq!(name, resolve_filename(None, &url("http://h/")));
    }

    #[test]
    fn test_sanitize_strips_invalid_characters() {
        assert_eq!(sanitize_filename("a<b>:c|d?.txt"), "abcd.txt");
        assert_eq!(sanitize_filename("..\\..\\evil.dll"), "....evil.dll");
        assert_eq!(sanitize_filename("tab\tname"), "tabname");
    }

    #[test]
    fn test_content_disposition_parsing() {
        assert_eq!(
            content_disposition_filename("attachment; filename=\"report v2.pdf\"").as_deref(),
            Some("report v2.pdf")
        );
        assert_eq!(
            content_disposition_filename("attachment; FILENAME=data.bin").as_deref(),
            Some("data.bin")
        );
        assert_eq!(content_disposition_filename("inline"), None);
    }

    #[test]
    fn test_url_key_is_stable_and_distinct() {
        let a = url("http://h/a.bin");
        let b = url("http://h/b.bin");
        assert_eq!(url_key(&a), url_key(&a));
        assert_ne!(url_key(&a), url_key(&b));
        assert_eq!(url_key(&a).len(), 16);
    }
}
