//! Blobcache full-page cache.
//!
//! Stores rendered HTTP responses as blobs keyed by a digest of the request
//! URL and serves them back to anonymous visitors:
//!
//! - **Keys**: canonical URL + device class, hashed with SHA-256
//! - **Policy**: bypass rules (sessions, pending comments, system paths, exclusions)
//! - **Coordinator**: read / write / invalidate against a [`BlobStore`]
//! - **Middleware**: the axum layer that ties the above to a request
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `blobcache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! cache_expiration = 300
//! not_found_expiration = 300   # also read as `404_duration`
//! cache_exclusions = "example.com/cart, example.com/checkout"
//! # ... see config/default.toml for all options
//! ```

mod config;
mod coordinator;
mod device;
mod entry;
mod error;
mod exclusions;
mod keys;
mod middleware;
mod policy;
mod store;

pub use config::CacheConfig;
pub use coordinator::{CacheCoordinator, CommentMarker, Invalidation, Lookup, MissReason};
pub use device::{classify as classify_device, is_mobile_user_agent};
pub use entry::CachedEntry;
pub use error::CacheError;
pub use exclusions::{ExclusionList, ExclusionRule, is_excluded};
pub use keys::{CacheKey, CanonicalUrl, DeviceClass, RequestIdentity, derive_key};
pub use middleware::{CACHE_STATUS_HEADER, CacheState, response_cache_layer, should_store_response};
pub use policy::{
    BypassReason, COMMENT_COOKIE_PREFIX, CachePolicy, PolicyContext, comment_cookie_name,
    expiration_for,
};
pub use store::{BlobMetadata, BlobStore, BlobStoreError, MemoryBlobStore, StoredBlob};
