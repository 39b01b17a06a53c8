use axum::{Router, middleware};

use crate::cache::{CacheState, response_cache_layer};

use super::{middleware::log_responses, upstream::{UpstreamClient, proxy_to_upstream}};

/// Every public path is proxied to the origin behind the page cache.
pub fn build_router(cache: CacheState, upstream: UpstreamClient) -> Router {
    Router::new()
        .fallback(proxy_to_upstream)
        .with_state(upstream)
        .layer(middleware::from_fn_with_state(cache, response_cache_layer))
        .layer(middleware::from_fn(log_responses))
}
