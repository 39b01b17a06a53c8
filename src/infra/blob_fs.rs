//! Filesystem-backed blob store.
//!
//! Layout: `<root>/<account>/<container>/<key>.blob`. A blob file holds the
//! JSON metadata on its first line followed by the raw body, so both are
//! replaced together. Writes go through a temporary file and a rename: readers
//! never observe a half-written blob, and concurrent writers of one key race
//! only on which complete blob lands last.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::cache::{BlobMetadata, BlobStore, BlobStoreError, StoredBlob};

const BLOB_SUFFIX: &str = "blob";
const HEADER_END: u8 = b'\n';

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Initialise storage for `account` under `directory`, creating it if necessary.
    pub fn new(directory: impl AsRef<Path>, account: &str) -> Result<Self, BlobStoreError> {
        validate_name(account)?;
        let root = directory.as_ref().join(account);
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, container: &str, key: &str) -> Result<PathBuf, BlobStoreError> {
        validate_name(container)?;
        validate_name(key)?;
        Ok(self.root.join(container).join(format!("{key}.{BLOB_SUFFIX}")))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        metadata: BlobMetadata,
    ) -> Result<(), BlobStoreError> {
        let path = self.blob_path(container, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Compact JSON never contains a raw newline.
        let mut data = serde_json::to_vec(&metadata)?;
        data.push(HEADER_END);
        data.extend_from_slice(&body);
        write_atomic(&path, &data).await?;
        debug!(container, key, size = body.len(), "wrote blob");
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<StoredBlob>, BlobStoreError> {
        let path = self.blob_path(container, key)?;
        let Some(data) = read_optional(&path).await? else {
            return Ok(None);
        };
        decode_blob(Bytes::from(data)).map(Some)
    }

    async fn exists(&self, container: &str, key: &str) -> Result<bool, BlobStoreError> {
        Ok(fs::try_exists(self.blob_path(container, key)?).await?)
    }

    /// Missing files are treated as success.
    async fn delete(&self, container: &str, key: &str) -> Result<(), BlobStoreError> {
        remove_optional(&self.blob_path(container, key)?).await
    }
}

fn decode_blob(data: Bytes) -> Result<StoredBlob, BlobStoreError> {
    let split = data
        .iter()
        .position(|byte| *byte == HEADER_END)
        .ok_or_else(|| BlobStoreError::backend("blob file has no metadata header"))?;
    let metadata: BlobMetadata = serde_json::from_slice(&data[..split])?;
    Ok(StoredBlob {
        body: data.slice(split + 1..),
        metadata,
    })
}

// Blob names become path segments; only plain identifiers are accepted.
fn validate_name(name: &str) -> Result<(), BlobStoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(BlobStoreError::InvalidName(name.to_string()))
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), BlobStoreError> {
    let sequence = TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp.{}.{sequence}", std::process::id()));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    Ok(result?)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, BlobStoreError> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(BlobStoreError::Io(err)),
    }
}

async fn remove_optional(path: &Path) -> Result<(), BlobStoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(BlobStoreError::Io(err)),
    }
}
