//! Operator-supplied URL exclusion list.
//!
//! The list is a comma separated string such as
//! `example.com/private, https://other.com/x?y=1`. Only host and path take
//! part in the comparison; scheme, port and query string are dropped and
//! both sides are compared with a trailing slash.

use tracing::debug;
use url::Url;

/// One normalized `host/path/` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRule(String);

impl ExclusionRule {
    /// Parse a single list entry; `None` when it carries no usable host.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }

        let parsed = if entry.contains("://") {
            Url::parse(entry)
        } else {
            Url::parse(&format!("http://{entry}"))
        };

        match parsed {
            Ok(url) => {
                let host = url.host_str().filter(|host| !host.is_empty())?;
                Some(Self(with_trailing_slash(&format!("{host}{}", url.path()))))
            }
            Err(err) => {
                debug!(entry, error = %err, "skipping malformed cache exclusion");
                None
            }
        }
    }

    pub fn matches(&self, normalized_host_path: &str) -> bool {
        self.0 == normalized_host_path
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Exclusion rules parsed once from configuration.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    rules: Vec<ExclusionRule>,
}

impl ExclusionList {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }

        Self {
            rules: raw.split(',').filter_map(ExclusionRule::parse).collect(),
        }
    }

    /// True when `current_host_path` (host immediately followed by path)
    /// matches any rule.
    pub fn is_excluded(&self, current_host_path: &str) -> bool {
        if self.rules.is_empty() {
            return false;
        }

        let current = with_trailing_slash(&lowercase_host(current_host_path));
        self.rules.iter().any(|rule| rule.matches(&current))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// One-shot form of [`ExclusionList::is_excluded`] for callers holding the raw
/// configuration string.
pub fn is_excluded(current_host_path: &str, exclusion_list_raw: &str) -> bool {
    ExclusionList::parse(exclusion_list_raw).is_excluded(current_host_path)
}

fn with_trailing_slash(value: &str) -> String {
    if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    }
}

// Hosts are case-insensitive, paths are not.
fn lowercase_host(host_path: &str) -> String {
    match host_path.find('/') {
        Some(index) => format!(
            "{}{}",
            host_path[..index].to_ascii_lowercase(),
            &host_path[index..]
        ),
        None => host_path.to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_never_excludes() {
        assert!(!is_excluded("example.com/private", ""));
        assert!(!is_excluded("example.com/private", "   "));
        assert!(!is_excluded("example.com/private", " , ,"));
    }

    #[test]
    fn trailing_slash_is_normalized_on_both_sides() {
        let raw = "example.com/private, other.com/x";
        assert!(is_excluded("example.com/private/", raw));
        assert!(is_excluded("example.com/private", raw));
        assert!(is_excluded("other.com/x/", raw));
    }

    #[test]
    fn scheme_and_query_are_ignored_in_entries() {
        let raw = "https://example.com/private?preview=1";
        assert!(is_excluded("example.com/private", raw));
    }

    #[test]
    fn unlisted_urls_are_not_excluded() {
        let raw = "example.com/private";
        assert!(!is_excluded("example.com/public", raw));
        assert!(!is_excluded("example.com/private/child", raw));
        assert!(!is_excluded("other.com/private", raw));
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let raw = "http://exa mple.com/x, ://, example.com/ok";
        let list = ExclusionList::parse(raw);
        assert_eq!(list.len(), 1);
        assert!(list.is_excluded("example.com/ok"));
    }

    #[test]
    fn host_comparison_is_case_insensitive() {
        assert!(is_excluded("Example.COM/private", "example.com/private"));
        assert!(!is_excluded("example.com/Private", "example.com/private"));
    }

    #[test]
    fn bare_host_entry_matches_root() {
        assert!(is_excluded("example.com/", "example.com"));
    }
}
