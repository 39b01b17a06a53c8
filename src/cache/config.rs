//! Cache configuration.
//!
//! Controls what is cached, for how long, and which request signals bypass
//! the cache. Populated from the `[cache]` table of `blobcache.toml`.

use std::time::Duration;

pub(crate) const DEFAULT_EXPIRATION_SECS: i64 = 300;
pub(crate) const DEFAULT_NOT_FOUND_EXPIRATION_SECS: i64 = 300;
pub(crate) const DEFAULT_COMMENT_MARKER_TTL_SECS: u64 = 1800;
pub(crate) const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
pub(crate) const DEFAULT_SESSION_COOKIE_MARKER: &str = "wordpress_logged_in";
pub(crate) const DEFAULT_COMMENT_ENDPOINT: &str = "wp-comments-post.php";
pub(crate) const DEFAULT_SCHEME: &str = "http";
pub(crate) const DEFAULT_PRESERVED_HEADERS: &[&str] = &["content-type", "cache-control"];

/// Request paths that never reach the cache.
pub(crate) const SYSTEM_PATHS: &[&str] = &[
    "wp-admin",
    "wp-login.php",
    "wp-cron.php",
    "wp-comments-post.php",
    "xmlrpc.php",
    "wp-signup.php",
    "wp-trackback.php",
    "wp-links-opml.php",
    "wp-blog-header.php",
];

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch for the response cache.
    pub enabled: bool,
    /// Lifetime of a cached page; non-positive values fall back to 300.
    pub expiration_seconds: Option<i64>,
    /// Lifetime of a cached 404 page.
    pub not_found_expiration_seconds: Option<i64>,
    /// Comma separated `host/path` list that is never cached.
    pub exclusions: String,
    /// Lifetime of the pending-comment cookie.
    pub comment_marker_ttl_seconds: u64,
    /// Upper bound for every blob store call.
    pub store_timeout_ms: u64,
    /// Response headers replayed on a hit (lowercase names).
    pub preserved_headers: Vec<String>,
    /// Substring of a cookie name that marks a logged-in visitor.
    pub session_cookie_marker: String,
    /// Request path suffix of the comment submission endpoint.
    pub comment_endpoint: String,
    /// Operator-designated paths bypassed in addition to [`SYSTEM_PATHS`].
    pub bypass_paths: Vec<String>,
    /// Add timing comments to HTML responses.
    pub annotate_html: bool,
    /// Bodies larger than this are delivered but not stored.
    pub max_body_bytes: usize,
    /// Scheme of the public site when no forwarded scheme is trusted.
    pub default_scheme: String,
    /// Take the scheme from `X-Forwarded-Proto` (TLS terminated upstream).
    pub trust_forwarded_proto: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiration_seconds: None,
            not_found_expiration_seconds: None,
            exclusions: String::new(),
            comment_marker_ttl_seconds: DEFAULT_COMMENT_MARKER_TTL_SECS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            preserved_headers: DEFAULT_PRESERVED_HEADERS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            session_cookie_marker: DEFAULT_SESSION_COOKIE_MARKER.to_string(),
            comment_endpoint: DEFAULT_COMMENT_ENDPOINT.to_string(),
            bypass_paths: Vec::new(),
            annotate_html: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            default_scheme: DEFAULT_SCHEME.to_string(),
            trust_forwarded_proto: false,
        }
    }
}

impl CacheConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.max(1))
    }

    pub fn comment_marker_ttl(&self) -> Duration {
        Duration::from_secs(self.comment_marker_ttl_seconds)
    }

    pub fn preserves_header(&self, name: &str) -> bool {
        self.preserved_headers
            .iter()
            .any(|preserved| preserved.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.expiration_seconds, None);
        assert_eq!(config.comment_marker_ttl_seconds, 1800);
        assert_eq!(config.store_timeout_ms, 2000);
        assert_eq!(config.session_cookie_marker, "wordpress_logged_in");
        assert!(config.annotate_html);
    }

    #[test]
    fn preserved_headers_match_case_insensitively() {
        let config = CacheConfig::default();
        assert!(config.preserves_header("Content-Type"));
        assert!(config.preserves_header("CACHE-CONTROL"));
        assert!(!config.preserves_header("set-cookie"));
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let config = CacheConfig {
            store_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.store_timeout(), Duration::from_millis(1));
    }
}
