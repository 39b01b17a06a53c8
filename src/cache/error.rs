use std::fmt::Display;

use thiserror::Error;

use super::store::BlobStoreError;

/// Failures surfaced by the cache core. None of them is fatal to a request.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("blob store unavailable: {0}")]
    StoreUnavailable(#[from] BlobStoreError),
    #[error("blob store {operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u128,
    },
    #[error("malformed request url `{url}`: {reason}")]
    MalformedRequestUrl { url: String, reason: String },
}

impl CacheError {
    pub fn malformed_url(url: impl Into<String>, reason: impl Display) -> Self {
        Self::MalformedRequestUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
