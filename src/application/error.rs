use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{cache::CacheError, infra::error::InfraError};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<CacheError> for HttpError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::MalformedRequestUrl { .. } => HttpError::from_error(
                "application::error::cache_error_to_http_error",
                StatusCode::BAD_REQUEST,
                "Invalid page url",
                &error,
            ),
            CacheError::StoreUnavailable(_) | CacheError::Timeout { .. } => HttpError::from_error(
                "application::error::cache_error_to_http_error",
                StatusCode::SERVICE_UNAVAILABLE,
                "Cache storage unavailable",
                &error,
            ),
        }
    }
}

/// Failures that stop the service from starting or serving.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BlobStoreError;

    #[test]
    fn app_error_displays_infra_source_transparently() {
        let infra = InfraError::configuration("storage.directory is not writable");
        let expected = infra.to_string();
        assert_eq!(AppError::from(infra).to_string(), expected);
        assert_eq!(AppError::unexpected("boom").to_string(), "unexpected error: boom");
    }

    #[test]
    fn report_collects_source_chain() {
        let error = CacheError::from(BlobStoreError::backend("disk full"));
        let report = ErrorReport::from_error("test", StatusCode::SERVICE_UNAVAILABLE, &error);
        assert_eq!(
            report.messages,
            vec![
                "blob store unavailable: blob backend error: disk full".to_string(),
                "blob backend error: disk full".to_string(),
            ]
        );
    }

    #[test]
    fn cache_errors_map_to_http_statuses() {
        let malformed = HttpError::from(CacheError::malformed_url("x", "bad"));
        assert_eq!(malformed.into_response().status(), StatusCode::BAD_REQUEST);

        let timeout = HttpError::from(CacheError::Timeout {
            operation: "delete",
            timeout_ms: 10,
        });
        let response = timeout.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }
}
