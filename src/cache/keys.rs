//! Cache key derivation.
//!
//! A page is identified by its canonical URL (`scheme://host/path?query`
//! plus an optional `|mobile` suffix). The SHA-256 digest of that string is
//! the blob name the page is stored under.

use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

use super::error::CacheError;

const MOBILE_SUFFIX: &str = "|mobile";

/// Device class dimension of a cached variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    pub fn from_mobile_flag(is_mobile: bool) -> Self {
        if is_mobile {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }

    pub fn is_mobile(self) -> bool {
        matches!(self, Self::Mobile)
    }
}

/// Opaque identifier of a cached page: lowercase hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical textual form of a request; the preimage of its [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    pub fn new(
        scheme: &str,
        host: &str,
        path: &str,
        query: Option<&str>,
        device: DeviceClass,
    ) -> Self {
        let mut url = String::with_capacity(scheme.len() + host.len() + path.len() + 16);
        url.push_str(scheme);
        url.push_str("://");
        url.push_str(host);
        url.push_str(path);

        if let Some(query) = query.filter(|query| !query.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        if device.is_mobile() {
            url.push_str(MOBILE_SUFFIX);
        }

        Self(url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn cache_key(&self) -> CacheKey {
        let digest = Sha256::digest(self.0.as_bytes());
        CacheKey(hex::encode(digest.as_slice()))
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for one request variant.
pub fn derive_key(
    scheme: &str,
    host: &str,
    path: &str,
    query: Option<&str>,
    is_mobile: bool,
) -> CacheKey {
    CanonicalUrl::new(
        scheme,
        host,
        path,
        query,
        DeviceClass::from_mobile_flag(is_mobile),
    )
    .cache_key()
}

/// Request fields that feed key derivation and the exclusion check.
///
/// The host never carries a port, so `example.com:8080` and `example.com`
/// share entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    scheme: String,
    host: String,
    path: String,
    query: Option<String>,
    device: DeviceClass,
}

impl RequestIdentity {
    /// Parse the raw request pieces (`Host` header and request target).
    pub fn parse(
        scheme: &str,
        host_header: &str,
        request_uri: &str,
        device: DeviceClass,
    ) -> Result<Self, CacheError> {
        let raw = format!("{scheme}://{host_header}{request_uri}");
        if host_header.is_empty() || !host_header.chars().all(is_authority_char) {
            return Err(CacheError::malformed_url(raw, "invalid host header"));
        }

        let url = Url::parse(&raw).map_err(|err| CacheError::malformed_url(&raw, err))?;
        Self::from_url(&url, device).ok_or_else(|| CacheError::malformed_url(&raw, "missing host"))
    }

    /// Build an identity from an absolute URL, e.g. a permalink.
    pub fn from_url(url: &Url, device: DeviceClass) -> Option<Self> {
        let host = url.host_str().filter(|host| !host.is_empty())?;
        Some(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            path: url.path().to_string(),
            query: url.query().map(str::to_string),
            device,
        })
    }

    pub fn with_device(&self, device: DeviceClass) -> Self {
        Self {
            device,
            ..self.clone()
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn device(&self) -> DeviceClass {
        self.device
    }

    /// `host` + `path`, the form exclusion rules are written in.
    pub fn host_path(&self) -> String {
        format!("{}{}", self.host, self.path)
    }

    pub fn canonical_url(&self) -> CanonicalUrl {
        CanonicalUrl::new(
            &self.scheme,
            &self.host,
            &self.path,
            self.query.as_deref(),
            self.device,
        )
    }

    pub fn cache_key(&self) -> CacheKey {
        self.canonical_url().cache_key()
    }
}

// A Host header is `host[:port]`; anything else could shift the parsed path.
fn is_authority_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':' | '[' | ']' | '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha256_hex(input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()).as_slice())
    }

    #[test]
    fn canonical_url_includes_query_and_mobile_suffix() {
        let url = CanonicalUrl::new(
            "http",
            "example.com",
            "/blog/post-1",
            Some("ref=tw"),
            DeviceClass::Mobile,
        );
        assert_eq!(url.as_str(), "http://example.com/blog/post-1?ref=tw|mobile");
    }

    #[test]
    fn empty_query_is_omitted() {
        let url = CanonicalUrl::new("https", "example.com", "/", Some(""), DeviceClass::Desktop);
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn key_is_sha256_of_canonical_url() {
        let key = derive_key("http", "example.com", "/blog/post-1", Some("ref=tw"), false);
        assert_eq!(key.as_str(), sha256_hex("http://example.com/blog/post-1?ref=tw"));
        assert_eq!(key.as_str().len(), 64);
    }

    #[test]
    fn derivation_is_deterministic() {
        let first = derive_key("http", "example.com", "/a", Some("x=1"), true);
        let second = derive_key("http", "example.com", "/a", Some("x=1"), true);
        assert_eq!(first, second);
    }

    #[test]
    fn every_dimension_changes_the_key() {
        let base = derive_key("http", "example.com", "/a", Some("x=1"), false);

        assert_ne!(base, derive_key("https", "example.com", "/a", Some("x=1"), false));
        assert_ne!(base, derive_key("http", "example.org", "/a", Some("x=1"), false));
        assert_ne!(base, derive_key("http", "example.com", "/b", Some("x=1"), false));
        assert_ne!(base, derive_key("http", "example.com", "/a", Some("x=2"), false));
        assert_ne!(base, derive_key("http", "example.com", "/a", None, false));
        assert_ne!(base, derive_key("http", "example.com", "/a", Some("x=1"), true));
    }

    #[test]
    fn identity_parses_host_header_and_target() {
        let identity = RequestIdentity::parse(
            "http",
            "Example.com:8080",
            "/blog/post-1?ref=tw",
            DeviceClass::Desktop,
        )
        .expect("valid request");

        assert_eq!(identity.host_path(), "example.com/blog/post-1");
        assert_eq!(
            identity.canonical_url().as_str(),
            "http://example.com/blog/post-1?ref=tw"
        );
    }

    #[test]
    fn identity_rejects_unparseable_host() {
        let result = RequestIdentity::parse("http", "exa mple.com", "/", DeviceClass::Desktop);
        assert!(matches!(result, Err(CacheError::MalformedRequestUrl { .. })));
    }

    #[test]
    fn identity_rejects_host_headers_that_smuggle_paths() {
        for host in ["example.com/evil", "user@example.com", "example.com?x", ""] {
            let result = RequestIdentity::parse("http", host, "/blog", DeviceClass::Desktop);
            assert!(
                matches!(result, Err(CacheError::MalformedRequestUrl { .. })),
                "{host}"
            );
        }
    }

    #[test]
    fn with_device_switches_variant() {
        let desktop = RequestIdentity::parse("http", "example.com", "/", DeviceClass::Desktop)
            .expect("valid request");
        let mobile = desktop.with_device(DeviceClass::Mobile);
        assert_ne!(desktop.cache_key(), mobile.cache_key());
        assert!(mobile.canonical_url().as_str().ends_with("|mobile"));
    }
}
