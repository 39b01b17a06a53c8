//! Cacheability policy.
//!
//! Decides per request whether the cache is consulted at all and how long a
//! stored page lives. Every bypass rule is an independent condition; the
//! first one found is reported for logging only.

use std::time::Duration;

use axum::http::Method;

use super::config::{
    CacheConfig, DEFAULT_EXPIRATION_SECS, DEFAULT_NOT_FOUND_EXPIRATION_SECS, SYSTEM_PATHS,
};
use super::exclusions::ExclusionList;
use super::keys::{CacheKey, RequestIdentity};

pub const COMMENT_COOKIE_PREFIX: &str = "comment_post_key_";

/// Why a request skipped the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    Disabled,
    Method,
    MalformedUrl,
    Authenticated,
    CommentPending,
    SystemPath,
    Excluded,
}

impl BypassReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Method => "method",
            Self::MalformedUrl => "malformed_url",
            Self::Authenticated => "authenticated",
            Self::CommentPending => "comment_pending",
            Self::SystemPath => "system_path",
            Self::Excluded => "excluded",
        }
    }
}

/// Per-request inputs of the bypass decision.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub method: Method,
    /// Raw request target including the query string.
    pub request_uri: String,
    /// Normalized `host/path` used against the exclusion list.
    pub host_path: String,
    pub authenticated: bool,
    pub comment_pending: bool,
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    config: CacheConfig,
    exclusions: ExclusionList,
}

impl CachePolicy {
    pub fn new(config: CacheConfig) -> Self {
        let exclusions = ExclusionList::parse(&config.exclusions);
        Self { config, exclusions }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Collect the decision inputs for one request.
    ///
    /// `cookie_headers` are the raw values of every `Cookie` header.
    pub fn context<'a>(
        &self,
        method: &Method,
        request_uri: &str,
        identity: &RequestIdentity,
        key: &CacheKey,
        cookie_headers: impl IntoIterator<Item = &'a str>,
    ) -> PolicyContext {
        let pending_cookie = comment_cookie_name(key);
        let session_marker = self.config.session_cookie_marker.as_str();
        let mut authenticated = false;
        let mut comment_pending = false;

        for name in cookie_headers.into_iter().flat_map(cookie_names) {
            if !session_marker.is_empty() && name.contains(session_marker) {
                authenticated = true;
            }
            if name == pending_cookie {
                comment_pending = true;
            }
        }

        PolicyContext {
            method: method.clone(),
            request_uri: request_uri.to_string(),
            host_path: identity.host_path(),
            authenticated,
            comment_pending,
        }
    }

    pub fn bypass_reason(&self, ctx: &PolicyContext) -> Option<BypassReason> {
        if !self.config.enabled {
            return Some(BypassReason::Disabled);
        }
        if ctx.method != Method::GET {
            return Some(BypassReason::Method);
        }
        if ctx.authenticated {
            return Some(BypassReason::Authenticated);
        }
        if ctx.comment_pending {
            return Some(BypassReason::CommentPending);
        }
        if self.is_system_path(&ctx.request_uri) {
            return Some(BypassReason::SystemPath);
        }
        if self.exclusions.is_excluded(&ctx.host_path) {
            return Some(BypassReason::Excluded);
        }
        None
    }

    pub fn should_bypass(&self, ctx: &PolicyContext) -> bool {
        self.bypass_reason(ctx).is_some()
    }

    pub fn expiration_for(&self, is_not_found: bool) -> Duration {
        expiration_for(
            is_not_found,
            self.config.expiration_seconds,
            self.config.not_found_expiration_seconds,
        )
    }

    fn is_system_path(&self, request_uri: &str) -> bool {
        SYSTEM_PATHS
            .iter()
            .copied()
            .chain(self.config.bypass_paths.iter().map(String::as_str))
            .filter(|path| !path.is_empty())
            .any(|path| request_uri.contains(path))
    }

    pub(crate) fn is_comment_endpoint(&self, path: &str) -> bool {
        !self.config.comment_endpoint.is_empty() && path.ends_with(&self.config.comment_endpoint)
    }
}

/// Effective lifetime of a stored page. Unset or non-positive configuration
/// falls back to 300 seconds.
pub fn expiration_for(
    is_not_found: bool,
    configured: Option<i64>,
    configured_not_found: Option<i64>,
) -> Duration {
    let (value, default) = if is_not_found {
        (configured_not_found, DEFAULT_NOT_FOUND_EXPIRATION_SECS)
    } else {
        (configured, DEFAULT_EXPIRATION_SECS)
    };

    let seconds = value
        .filter(|seconds| *seconds > 0)
        .unwrap_or(default)
        .unsigned_abs();
    Duration::from_secs(seconds)
}

pub fn comment_cookie_name(key: &CacheKey) -> String {
    format!("{COMMENT_COOKIE_PREFIX}{key}")
}

/// Cookie names from one `Cookie` header value.
pub fn cookie_names(header: &str) -> impl Iterator<Item = &str> {
    header
        .split(';')
        .map(|pair| pair.split_once('=').map_or(pair, |(name, _)| name).trim())
        .filter(|name| !name.is_empty())
}
