//! The unit stored per cached page.

use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;

use super::store::{BlobMetadata, BlobStoreError, StoredBlob};

/// A cached page as read from or written to the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub status: u16,
    /// Preserved response headers, lowercase names.
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub expiration: Duration,
    /// Unix timestamp (seconds) of the write.
    pub written_at: i64,
}

impl CachedEntry {
    /// True once `expiration` has elapsed since the write.
    pub fn is_expired(&self, now: i64) -> bool {
        let expiration = i64::try_from(self.expiration.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(self.written_at) >= expiration
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub(crate) fn into_blob(self) -> Result<(Bytes, BlobMetadata), BlobStoreError> {
        let custom_headers = if self.headers.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&self.headers)?)
        };

        let metadata = BlobMetadata {
            max_age_seconds: self.expiration.as_secs(),
            content_type: self.content_type,
            custom_headers,
            status: self.status,
            written_at: self.written_at,
        };
        Ok((self.body, metadata))
    }
}

impl TryFrom<StoredBlob> for CachedEntry {
    type Error = BlobStoreError;

    fn try_from(blob: StoredBlob) -> Result<Self, Self::Error> {
        let StoredBlob { body, metadata } = blob;
        let headers = match metadata.custom_headers.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)?,
            _ => BTreeMap::new(),
        };

        Ok(Self {
            status: metadata.status,
            headers,
            content_type: metadata.content_type,
            body,
            expiration: Duration::from_secs(metadata.max_age_seconds),
            written_at: metadata.written_at,
        })
    }
}
