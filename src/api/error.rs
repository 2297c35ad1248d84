use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::db::StoreError;
use crate::error::{Error, ErrorKind};
use crate::multisig::MultisigError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited: {message}")]
    RateLimited { message: String, retry_after: Option<u64> },

    #[error("Upstream source unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ApiError::Unavailable(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
        };

        let body = Json(json!({
            "error": message,
        }));

        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after: Some(secs), .. } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::InvalidInput => ApiError::BadRequest(message),
            ErrorKind::NotFound => ApiError::NotFound(message),
            ErrorKind::Conflict => ApiError::Conflict(message),
            ErrorKind::RateLimited => ApiError::RateLimited {
                retry_after: err.retry_after().map(|d| d.as_secs()),
                message,
            },
            ErrorKind::SourceUnavailable => {
                warn!("Request failed on an upstream source: {}", message);
                ApiError::Unavailable(message)
            }
            ErrorKind::Cancelled => {
                debug!("Request cancelled: {}", message);
                ApiError::Unavailable(message)
            }
            ErrorKind::Internal => {
                error!("Internal error while serving request: {}", message);
                ApiError::Internal(message)
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Error::from(err).into()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Error::from(err).into()
    }
}

impl From<MultisigError> for ApiError {
    fn from(err: MultisigError) -> Self {
        Error::from(err).into()
    }
}
