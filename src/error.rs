use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuotaError>;

#[derive(Debug, Clone, Error)]
pub enum QuotaError {
    #[error("User not found with id: {0}")]
    UserNotFound(String),

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Counter store error: {0}")]
    CounterStore(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuotaError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            QuotaError::UserNotFound(_) => StatusCode::NOT_FOUND,
            QuotaError::InvalidUserId(_) | QuotaError::Validation(_) => StatusCode::BAD_REQUEST,
            // Fail closed: an unreachable counter store never turns into "allowed".
            QuotaError::CounterStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            QuotaError::Database(_) | QuotaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for QuotaError {
    fn from(err: redis::RedisError) -> Self {
        QuotaError::CounterStore(err.to_string())
    }
}

impl From<sqlx::Error> for QuotaError {
    fn from(err: sqlx::Error) -> Self {
        QuotaError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for QuotaError {
    fn from(err: serde_json::Error) -> Self {
        QuotaError::Internal(format!("Malformed user document: {}", err))
    }
}

impl From<validator::ValidationErrors> for QuotaError {
    fn from(err: validator::ValidationErrors) -> Self {
        QuotaError::Validation(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_quota_error(err: &QuotaError) -> Self {
        let code = err.status_code().as_u16();
        match err {
            QuotaError::UserNotFound(_) => Self::new("not_found", &err.to_string(), code),
            QuotaError::InvalidUserId(_) => Self::new("bad_request", &err.to_string(), code),
            QuotaError::Validation(_) => Self::new("validation_error", &err.to_string(), code),
            QuotaError::CounterStore(_) => Self::new("service_unavailable", &err.to_string(), code),
            QuotaError::Database(_) => Self::new("database_error", &err.to_string(), code),
            QuotaError::Internal(_) => Self::new("internal_error", &err.to_string(), code),
        }
    }
}

impl IntoResponse for QuotaError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse::from_quota_error(&self);
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_not_found_maps_to_404() {
        let err = QuotaError::UserNotFound("u1".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let body = ErrorResponse::from_quota_error(&err);
        assert_eq!(body.code, 404);
        assert_eq!(body.error, "not_found");
        assert!(body.message.contains("u1"));
    }

    #[test]
    fn test_store_outage_fails_closed() {
        let err = QuotaError::CounterStore("connection refused".to_string());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_validation_maps_to_400() {
        let err = QuotaError::Validation("firstName too long".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorResponse::from_quota_error(&err).error, "validation_error");
    }
}
