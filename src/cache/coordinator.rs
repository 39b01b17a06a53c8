//! Read / write / invalidate protocol against the blob store.
//!
//! The coordinator holds no page data of its own: every call re-derives what
//! it needs and goes to the store, bounded by the configured timeout.

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use axum::http::{HeaderMap, StatusCode, header};
use bytes::Bytes;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    entry::CachedEntry,
    error::CacheError,
    keys::{CacheKey, DeviceClass, RequestIdentity},
    policy::{CachePolicy, comment_cookie_name},
    store::{BlobStore, BlobStoreError},
};

const METRIC_HIT_TOTAL: &str = "blobcache_hit_total";
const METRIC_MISS_TOTAL: &str = "blobcache_miss_total";
const METRIC_STORE_FAILURE_TOTAL: &str = "blobcache_store_failure_total";
const METRIC_INVALIDATE_TOTAL: &str = "blobcache_invalidate_total";
const METRIC_STORE_MS: &str = "blobcache_store_ms";

/// Result of a cache read.
#[derive(Debug)]
pub enum Lookup {
    Hit(CachedEntry),
    Miss(MissReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Empty,
    Expired,
    StoreFailure,
}

impl MissReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Empty => "empty",
            Self::Expired => "expired",
            Self::StoreFailure => "store_failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    Removed,
    Absent,
}

/// Short-lived cookie that lets a commenter see their own comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentMarker {
    pub name: String,
    pub ttl: Duration,
}

impl CommentMarker {
    /// Value for a `Set-Cookie` header.
    pub fn set_cookie_value(&self) -> String {
        format!("{}=1; Max-Age={}; Path=/", self.name, self.ttl.as_secs())
    }
}

pub struct CacheCoordinator {
    store: Arc<dyn BlobStore>,
    policy: CachePolicy,
    container: String,
    timeout: Duration,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn BlobStore>, policy: CachePolicy, container: impl Into<String>) -> Self {
        let timeout = policy.config().store_timeout();
        Self {
            store,
            policy,
            container: container.into(),
            timeout,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Look up a stored page. Never writes; store failures read as a miss.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn try_serve(&self, key: &CacheKey) -> Lookup {
        self.try_serve_at(key, unix_now()).await
    }

    pub(crate) async fn try_serve_at(&self, key: &CacheKey, now: i64) -> Lookup {
        let lookup = match self.fetch(key).await {
            Ok(Some(entry)) if entry.body.is_empty() => Lookup::Miss(MissReason::Empty),
            Ok(Some(entry)) if entry.is_expired(now) => Lookup::Miss(MissReason::Expired),
            Ok(Some(entry)) => Lookup::Hit(entry),
            Ok(None) => Lookup::Miss(MissReason::Absent),
            Err(err) => {
                warn!(error = %err, "cache read failed, treating as miss");
                Lookup::Miss(MissReason::StoreFailure)
            }
        };

        match &lookup {
            Lookup::Hit(_) => {
                counter!(METRIC_HIT_TOTAL).increment(1);
                debug!(cache = "blob", outcome = "hit", "cache hit");
            }
            Lookup::Miss(reason) => {
                counter!(METRIC_MISS_TOTAL, "reason" => reason.as_str()).increment(1);
                debug!(cache = "blob", outcome = "miss", reason = reason.as_str(), "cache miss");
            }
        }

        lookup
    }

    /// Write a generated page. The caller delivers its response whatever the
    /// outcome.
    #[instrument(skip_all, fields(key = %key, status = status.as_u16()))]
    pub async fn store(
        &self,
        key: &CacheKey,
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<(), CacheError> {
        let started_at = Instant::now();
        let entry = CachedEntry {
            status: status.as_u16(),
            headers: self.preserved_headers(headers),
            content_type: headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            body,
            expiration: self.policy.expiration_for(status == StatusCode::NOT_FOUND),
            written_at: unix_now(),
        };
        let expiration_secs = entry.expiration.as_secs();

        let result = match entry.into_blob() {
            Ok((body, metadata)) => {
                self.bounded(
                    "put",
                    self.store.put(&self.container, key.as_str(), body, metadata),
                )
                .await
            }
            Err(err) => Err(CacheError::from(err)),
        };

        histogram!(METRIC_STORE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        match &result {
            Ok(()) => debug!(cache = "blob", expiration_secs, "stored page"),
            Err(err) => {
                counter!(METRIC_STORE_FAILURE_TOTAL).increment(1);
                warn!(error = %err, "cache write failed, response delivered uncached");
            }
        }
        result
    }

    /// Remove a stored page; a missing page is not an error.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn invalidate(&self, key: &CacheKey) -> Result<Invalidation, CacheError> {
        let exists = self
            .bounded("exists", self.store.exists(&self.container, key.as_str()))
            .await
            .inspect_err(|err| warn!(error = %err, "cache invalidation failed"))?;
        if !exists {
            return Ok(Invalidation::Absent);
        }

        self.bounded("delete", self.store.delete(&self.container, key.as_str()))
            .await
            .inspect_err(|err| warn!(error = %err, "cache invalidation failed"))?;

        counter!(METRIC_INVALIDATE_TOTAL).increment(1);
        debug!(cache = "blob", "invalidated page");
        Ok(Invalidation::Removed)
    }

    /// Invalidate every device variant of a page URL. Returns how many
    /// entries were removed.
    pub async fn invalidate_url(&self, url: &Url) -> Result<usize, CacheError> {
        let desktop = RequestIdentity::from_url(url, DeviceClass::Desktop)
            .ok_or_else(|| CacheError::malformed_url(url.as_str(), "missing host"))?;

        let mut removed = 0;
        for device in [DeviceClass::Desktop, DeviceClass::Mobile] {
            let key = desktop.with_device(device).cache_key();
            if self.invalidate(&key).await? == Invalidation::Removed {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Build the pending-comment marker for a page.
    pub fn mark_comment_pending(&self, key: &CacheKey, ttl: Duration) -> CommentMarker {
        CommentMarker {
            name: comment_cookie_name(key),
            ttl,
        }
    }

    async fn fetch(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
        let blob = self
            .bounded("get", self.store.get(&self.container, key.as_str()))
            .await?;
        blob.map(CachedEntry::try_from)
            .transpose()
            .map_err(CacheError::from)
    }

    fn preserved_headers(&self, headers: &HeaderMap) -> BTreeMap<String, String> {
        let config = self.policy.config();
        let mut preserved: BTreeMap<String, String> = BTreeMap::new();

        for (name, value) in headers {
            if !config.preserves_header(name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            preserved
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        preserved
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, BlobStoreError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout {
                operation,
                timeout_ms: self.timeout.as_millis(),
            }),
        }
    }
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
