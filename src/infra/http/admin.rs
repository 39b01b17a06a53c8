use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::{application::error::HttpError, cache::CacheState};

use super::middleware::log_responses;

/// Body of `POST /hooks/content-saved`, sent by the site when a page changes.
#[derive(Debug, Deserialize)]
pub struct ContentSaved {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvalidationReport {
    pub removed: usize,
}

pub fn build_admin_router(state: CacheState) -> Router {
    Router::new()
        .route("/health", get(admin_health))
        .route("/hooks/content-saved", post(content_saved))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
}

async fn admin_health() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

async fn content_saved(
    State(state): State<CacheState>,
    Json(payload): Json<ContentSaved>,
) -> Result<Json<InvalidationReport>, HttpError> {
    let url = Url::parse(payload.url.trim()).map_err(|err| {
        HttpError::from_error(
            "infra::http::admin::content_saved",
            StatusCode::BAD_REQUEST,
            "Invalid page url",
            &err,
        )
    })?;

    let removed = state.coordinator.invalidate_url(&url).await?;
    info!(page = %url, removed, "invalidated saved page");
    Ok(Json(InvalidationReport { removed }))
}
