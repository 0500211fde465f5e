//! Request fingerprints used as deduplication keys

use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Format selector used when the client does not ask for one
pub const DEFAULT_FORMAT: &str = "best";

const MAX_URL_BYTES: usize = 4096;
const MAX_FORMAT_BYTES: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("url is required")]
    EmptyUrl,
    #[error("url exceeds {MAX_URL_BYTES} bytes")]
    UrlTooLong,
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported url scheme '{0}', expected http or https")]
    UnsupportedScheme(String),
    #[error("url '{0}' has no host")]
    MissingHost(String),
    #[error("format selector exceeds {MAX_FORMAT_BYTES} bytes")]
    FormatTooLong,
    #[error("format selector contains control characters")]
    InvalidFormat,
}

/// Normalized identity of a download request: URL plus format selector.
///
/// Two requests that differ only in cosmetic ways (host case, fragment,
/// query parameter order, whitespace in the selector) share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub url: String,
    pub format: String,
    pub key: String,
}

impl Fingerprint {
    pub fn new(url: &str, format: Option<&str>) -> Result<Self, FingerprintError> {
        let url = normalize_url(url)?;
        let format = normalize_format(format.unwrap_or_default())?;
        let key = digest(&url, &format);
        Ok(Self { url, format, key })
    }

    /// Short prefix of the key, used when deriving job ids
    pub fn short_key(&self) -> &str {
        &self.key[..12.min(self.key.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.url, self.format)
    }
}

fn normalize_url(raw: &str) -> Result<String, FingerprintError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FingerprintError::EmptyUrl);
    }
    if raw.len() > MAX_URL_BYTES {
        return Err(FingerprintError::UrlTooLong);
    }

    let mut url = Url::parse(raw).map_err(|e| FingerprintError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(FingerprintError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(FingerprintError::MissingHost(raw.to_string()));
    }

    url.set_fragment(None);

    // Parameter order never changes what gets downloaded
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

fn normalize_format(raw: &str) -> Result<String, FingerprintError> {
    let format: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if format.is_empty() {
        return Ok(DEFAULT_FORMAT.to_string());
    }
    if format.len() > MAX_FORMAT_BYTES {
        return Err(FingerprintError::FormatTooLong);
    }
    if format.chars().any(char::is_control) {
        return Err(FingerprintError::InvalidFormat);
    }
    Ok(format)
}

fn digest(url: &str, format: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(format.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_urls_share_key() {
        let a =
            Fingerprint::new("https://Example.COM:443/watch?v=abc&t=10#comments", None).unwrap();
        let b = Fingerprint::new("  https://example.com/watch?t=10&v=abc ", Some("")).unwrap();

        assert_eq!(a.url, "https://example.com/watch?t=10&v=abc");
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn test_format_changes_key() {
        let a = Fingerprint::new("https://example.com/v/1", Some("bestaudio")).unwrap();
        let b = Fingerprint::new("https://example.com/v/1", Some("bestvideo")).unwrap();
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_format_whitespace_removed() {
        let fp = Fingerprint::new("https://example.com/v/1", Some(" bv*+ba / b ")).unwrap();
        assert_eq!(fp.format, "bv*+ba/b");

        let fp = Fingerprint::new("https://example.com/v/1", None).unwrap();
        assert_eq!(fp.format, DEFAULT_FORMAT);
    }

    #[test]
    fn test_trailing_slash_removed() {
        let a = Fingerprint::new("https://example.com/channel/videos/", None).unwrap();
        let b = Fingerprint::new("https://example.com/channel/videos", None).unwrap();
        assert_eq!(a.key, b.key);

        let root = Fingerprint::new("https://example.com", None).unwrap();
        assert_eq!(root.url, "https://example.com/");
    }

    #[test]
    fn test_rejects_invalid_urls() {
        assert_eq!(Fingerprint::new("   ", None), Err(FingerprintError::EmptyUrl));
        assert!(matches!(
            Fingerprint::new("not a url", None),
            Err(FingerprintError::InvalidUrl { .. })
        ));
        assert_eq!(
            Fingerprint::new("ftp://example.com/file", None),
            Err(FingerprintError::UnsupportedScheme("ftp".to_string()))
        );
    }

    #[test]
    fn test_rejects_oversized_format() {
        let format = "b".repeat(MAX_FORMAT_BYTES + 1);
        assert_eq!(
            Fingerprint::new("https://example.com/v/1", Some(&format)),
            Err(FingerprintError::FormatTooLong)
        );
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let fp = Fingerprint::new("https://example.com/v/1", None).unwrap();
        assert_eq!(fp.key.len(), 64);
        assert!(fp.key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short_key().len(), 12);
    }
}
