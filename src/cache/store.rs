//! Blob storage seam.
//!
//! Cached pages live in an object store addressed by `(container, key)`.
//! Implementations must be safe to share between concurrent requests.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid blob metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("invalid blob name `{0}`")]
    InvalidName(String),
    #[error("blob backend error: {0}")]
    Backend(String),
}

impl BlobStoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Metadata stored next to every blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Advisory lifetime, also replayed as `cache-control: max-age`.
    pub max_age_seconds: u64,
    pub content_type: Option<String>,
    /// JSON object of preserved response headers.
    pub custom_headers: Option<String>,
    /// HTTP status the body was generated with.
    pub status: u16,
    /// Unix timestamp (seconds) of the write.
    pub written_at: i64,
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub body: Bytes,
    pub metadata: BlobMetadata,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        metadata: BlobMetadata,
    ) -> Result<(), BlobStoreError>;

    /// `Ok(None)` when no blob exists under `key`.
    async fn get(&self, container: &str, key: &str) -> Result<Option<StoredBlob>, BlobStoreError>;

    async fn exists(&self, container: &str, key: &str) -> Result<bool, BlobStoreError>;

    async fn delete(&self, container: &str, key: &str) -> Result<(), BlobStoreError>;
}

/// Process-local store, used for single-node deployments and tests.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<(String, String), StoredBlob>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        metadata: BlobMetadata,
    ) -> Result<(), BlobStoreError> {
        let mut guard = self.blobs.write().await;
        guard.insert(
            (container.to_string(), key.to_string()),
            StoredBlob { body, metadata },
        );
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<StoredBlob>, BlobStoreError> {
        let guard = self.blobs.read().await;
        Ok(guard
            .get(&(container.to_string(), key.to_string()))
            .cloned())
    }

    async fn exists(&self, container: &str, key: &str) -> Result<bool, BlobStoreError> {
        let guard = self.blobs.read().await;
        Ok(guard.contains_key(&(container.to_string(), key.to_string())))
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), BlobStoreError> {
        let mut guard = self.blobs.write().await;
        guard.remove(&(container.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> BlobMetadata {
        BlobMetadata {
            max_age_seconds: 300,
            content_type: Some("text/html".to_string()),
            custom_headers: None,
            status: 200,
            written_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn memory_store_put_get_delete() {
        let store = MemoryBlobStore::new();
        assert!(store.get("pages", "k").await.expect("get").is_none());

        store
            .put("pages", "k", Bytes::from_static(b"<html></html>"), metadata())
            .await
            .expect("put");
        assert!(store.exists("pages", "k").await.expect("exists"));

        let blob = store.get("pages", "k").await.expect("get").expect("blob");
        assert_eq!(blob.body, Bytes::from_static(b"<html></html>"));
        assert_eq!(blob.metadata, metadata());

        store.delete("pages", "k").await.expect("delete");
        assert!(!store.exists("pages", "k").await.expect("exists"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn containers_are_isolated() {
        let store = MemoryBlobStore::new();
        store
            .put("a", "k", Bytes::from_static(b"a"), metadata())
            .await
            .expect("put");
        assert!(!store.exists("b", "k").await.expect("exists"));
    }

    #[tokio::test]
    async fn deleting_missing_blob_is_ok() {
        let store = MemoryBlobStore::new();
        store.delete("pages", "missing").await.expect("delete");
    }
}
