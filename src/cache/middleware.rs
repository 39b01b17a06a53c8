//! Response cache middleware.
//!
//! Sits in front of page generation: serves stored pages, captures freshly
//! generated ones, and handles the comment-submission side channel. Any
//! cache failure degrades to plain generation. At most `max_body_bytes` of a
//! generated page is held in memory; larger pages stream through unstored.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{
            self, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, LOCATION, SET_COOKIE,
        },
        response::Parts,
    },
    middleware::Next,
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, future, stream};
use http_body_util::BodyExt;
use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    config::CacheConfig,
    coordinator::{CacheCoordinator, Lookup},
    device,
    entry::CachedEntry,
    error::CacheError,
    keys::RequestIdentity,
    policy::BypassReason,
};

const METRIC_BYPASS_TOTAL: &str = "blobcache_bypass_total";

/// Reports how a response was produced: `hit`, `miss` or `bypass`.
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-blobcache");

const FORWARDED_PROTO: &str = "x-forwarded-proto";
const HEAD_CLOSE: &[u8] = b"</head>";

/// Shared cache state for the middleware.
#[derive(Clone)]
pub struct CacheState {
    pub coordinator: Arc<CacheCoordinator>,
}

impl CacheState {
    pub fn new(coordinator: Arc<CacheCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let coordinator = cache.coordinator.as_ref();
    let policy = coordinator.policy();
    let config = policy.config();

    let identity = match request_identity(&request, config) {
        Ok(identity) => identity,
        Err(err) => {
            debug!(error = %err, "request identity unavailable");
            record_bypass(BypassReason::MalformedUrl);
            return mark(next.run(request).await, "bypass");
        }
    };
    let key = identity.cache_key();

    let request_uri = request
        .uri()
        .path_and_query()
        .map_or("/", |value| value.as_str())
        .to_string();
    let cookies = request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok());
    let ctx = policy.context(request.method(), &request_uri, &identity, &key, cookies);

    if let Some(reason) = policy.bypass_reason(&ctx) {
        record_bypass(reason);
        let is_comment_submission =
            request.method() == Method::POST && policy.is_comment_endpoint(request.uri().path());
        let response = next.run(request).await;
        let response = if is_comment_submission {
            comment_submitted(coordinator, &identity, response).await
        } else {
            response
        };
        return mark(response, "bypass");
    }

    if let Lookup::Hit(entry) = coordinator.try_serve(&key).await {
        let note = config.annotate_html.then(|| {
            format!(
                "Served by blobcache in {:.3} seconds.",
                started_at.elapsed().as_secs_f64()
            )
        });
        return mark(cached_response(entry, note.as_deref()), "hit");
    }

    let response = next.run(request).await;
    if !should_store_response(&response) {
        return mark(response, "miss");
    }

    if declared_length(response.headers()).is_some_and(|length| length > config.max_body_bytes) {
        debug!("declared length too large to cache; streaming through");
        return mark(response, "miss");
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match buffer_within(body, config.max_body_bytes).await {
        Ok(Buffered::Complete(bytes)) => bytes,
        Ok(Buffered::Overflow(body)) => {
            debug!(limit = config.max_body_bytes, "response too large to cache; streaming through");
            return mark(Response::from_parts(parts, body), "miss");
        }
        Err(err) => {
            warn!(error = %err, "failed to buffer generated response");
            let mut response = Response::from_parts(parts, Body::empty());
            *response.status_mut() = StatusCode::BAD_GATEWAY;
            response.headers_mut().remove(CONTENT_LENGTH);
            return mark(response, "miss");
        }
    };

    if let Err(err) = coordinator
        .store(&key, parts.status, &parts.headers, bytes.clone())
        .await
    {
        debug!(error = %err, key = %key, "delivering response without caching");
    }

    let body = if config.annotate_html && is_html(&parts.headers) {
        let note = format!(
            "Page generated without caching in {:.3} seconds.",
            started_at.elapsed().as_secs_f64()
        );
        annotate(&bytes, &note).unwrap_or(bytes)
    } else {
        bytes
    };
    reset_length(&mut parts);

    mark(Response::from_parts(parts, Body::from(body)), "miss")
}

/// Only complete, shareable pages are stored: 200 and 404 answers that do
/// not set cookies, are not event streams and carry no content encoding.
pub fn should_store_response(response: &Response) -> bool {
    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::NOT_FOUND {
        return false;
    }

    if response.headers().contains_key(SET_COOKIE) || is_encoded(response.headers()) {
        return false;
    }

    !response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

enum Buffered {
    Complete(Bytes),
    /// The limit was crossed; the body replays what was read, then the rest.
    Overflow(Body),
}

/// Read at most `limit` bytes of `body` into memory.
async fn buffer_within(mut body: Body, limit: usize) -> Result<Buffered, axum::Error> {
    let mut buffered = BytesMut::new();
    loop {
        let Some(frame) = body.frame().await else {
            break;
        };
        let Ok(data) = frame?.into_data() else {
            continue;
        };
        buffered.extend_from_slice(&data);
        if buffered.len() > limit {
            let prefix = stream::once(future::ready(Ok::<_, axum::Error>(buffered.freeze())));
            let replay = prefix.chain(body.into_data_stream());
            return Ok(Buffered::Overflow(Body::from_stream(replay)));
        }
    }
    Ok(Buffered::Complete(buffered.freeze()))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn request_identity(request: &Request<Body>, config: &CacheConfig) -> Result<RequestIdentity, CacheError> {
    let headers = request.headers();

    let scheme = config
        .trust_forwarded_proto
        .then(|| headers.get(FORWARDED_PROTO))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or(value).trim().to_ascii_lowercase())
        .filter(|value| value == "http" || value == "https")
        .unwrap_or_else(|| config.default_scheme.clone());

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|authority| authority.to_string()))
        .ok_or_else(|| CacheError::malformed_url(request.uri().to_string(), "missing host"))?;

    let request_uri = request
        .uri()
        .path_and_query()
        .map_or("/", |value| value.as_str());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());

    RequestIdentity::parse(&scheme, &host, request_uri, device::classify(user_agent))
}

/// A comment was posted: the origin redirects back to the page. The
/// commenter gets a marker cookie for that page and the stored copies of the
/// page are dropped so the next visitor regenerates it.
async fn comment_submitted(
    coordinator: &CacheCoordinator,
    identity: &RequestIdentity,
    mut response: Response,
) -> Response {
    if !response.status().is_redirection() {
        return response;
    }

    let Some(target) = redirect_target(identity, response.headers()) else {
        return response;
    };

    let mut permalink = target.clone();
    permalink.set_query(None);

    let ttl = coordinator.policy().config().comment_marker_ttl();
    let mut marked = Vec::new();
    for page in [&target, &permalink] {
        let Some(page_identity) = RequestIdentity::from_url(page, identity.device()) else {
            continue;
        };
        let key = page_identity.cache_key();
        if marked.contains(&key) {
            continue;
        }

        let marker = coordinator.mark_comment_pending(&key, ttl);
        match HeaderValue::from_str(&marker.set_cookie_value()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(err) => warn!(error = %err, "invalid comment marker cookie"),
        }
        marked.push(key);
    }

    match coordinator.invalidate_url(&permalink).await {
        Ok(removed) => debug!(page = %permalink, removed, "refreshed commented page"),
        Err(err) => warn!(page = %permalink, error = %err, "failed to refresh commented page"),
    }

    response
}

/// Resolve `Location` against the request. Same-host targets are rebuilt
/// with the request's scheme and no port so they key like a page request;
/// off-site redirects yield `None`.
fn redirect_target(identity: &RequestIdentity, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    let base = Url::parse(&format!("{}://{}/", identity.scheme(), identity.host())).ok()?;
    let resolved = base.join(location).ok()?;
    if !resolved
        .host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(identity.host()))
    {
        return None;
    }

    let mut target = base;
    target.set_path(resolved.path());
    target.set_query(resolved.query());
    Some(target)
}

fn cached_response(entry: CachedEntry, note: Option<&str>) -> Response {
    let CachedEntry {
        status,
        headers,
        content_type,
        body,
        ..
    } = entry;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);

    let response_headers = response.headers_mut();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response_headers.insert(name, value);
            }
            _ => debug!(header = %name, "skipping unreplayable cached header"),
        }
    }
    if !response_headers.contains_key(CONTENT_TYPE)
        && let Some(value) = content_type.and_then(|value| HeaderValue::from_str(&value).ok())
    {
        response_headers.insert(CONTENT_TYPE, value);
    }

    let body = match note {
        Some(note) if is_html(response.headers()) => annotate(&body, note).unwrap_or(body),
        _ => body,
    };
    *response.body_mut() = Body::from(body);
    response
}

/// Insert an HTML comment right before `</head>`; `None` when the document
/// has no head.
fn annotate(body: &Bytes, note: &str) -> Option<Bytes> {
    let position = body
        .windows(HEAD_CLOSE.len())
        .position(|window| window == HEAD_CLOSE)?;

    let comment = format!("<!-- {note} -->\n");
    let mut annotated = Vec::with_capacity(body.len() + comment.len());
    annotated.extend_from_slice(&body[..position]);
    annotated.extend_from_slice(comment.as_bytes());
    annotated.extend_from_slice(&body[position..]);
    Some(Bytes::from(annotated))
}

fn is_html(headers: &HeaderMap) -> bool {
    !is_encoded(headers)
        && headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/html"))
}

fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| !value.trim().eq_ignore_ascii_case("identity"))
}

// The body may have been rewritten; hyper recomputes the length.
fn reset_length(parts: &mut Parts) {
    parts.headers.remove(CONTENT_LENGTH);
}

fn mark(mut response: Response, outcome: &'static str) -> Response {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(outcome));
    response
}

fn record_bypass(reason: BypassReason) {
    counter!(METRIC_BYPASS_TOTAL, "reason" => reason.as_str()).increment(1);
    debug!(cache = "blob", outcome = "bypass", reason = reason.as_str(), "cache bypassed");
}
