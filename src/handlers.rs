use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::error::QuotaError;
use crate::health::HealthChecker;
use crate::metrics::MetricsCollector;
use crate::quota::QuotaLimiter;
use crate::response::{quota_exceeded_message, quota_granted_message, ReadinessResponse};
use crate::users::{UserDto, UserPatch, UserRepository};
use crate::validation::RequestValidator;

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub limiter: QuotaLimiter,
    pub users: Arc<dyn UserRepository>,
    pub metrics: MetricsCollector,
    pub health: HealthChecker,
}

/// Charge one request against the user's quota window
pub async fn consume_quota(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Response, QuotaError> {
    if state.limiter.try_consume(&user_id).await? {
        return Ok((StatusCode::OK, quota_granted_message(&user_id)).into_response());
    }

    let mut resp =
        (StatusCode::TOO_MANY_REQUESTS, quota_exceeded_message(&user_id)).into_response();
    resp.headers_mut().insert(
        header::RETRY_AFTER,
        state.limiter.policy().window_secs().into(),
    );
    Ok(resp)
}

/// Every user with its current quota counter attached
pub async fn users_quota(State(state): State<SharedState>) -> Result<Response, QuotaError> {
    let users = state.limiter.list_user_quotas().await?;
    if users.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(users).into_response())
}

pub async fn list_users(
    State(state): State<SharedState>,
) -> Result<Json<Vec<UserDto>>, QuotaError> {
    let users = state.users.list().await?;
    Ok(Json(users.into_iter().map(UserDto::from).collect()))
}

pub async fn get_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<UserDto>, QuotaError> {
    RequestValidator::validate_user_id(&id)?;
    let user = state.users.get(&id).await?;
    Ok(Json(user.into()))
}

pub async fn create_user(
    State(state): State<SharedState>,
    Json(payload): Json<UserPatch>,
) -> Result<Json<UserDto>, QuotaError> {
    RequestValidator::validate_user_patch(&payload)?;
    let user = state.users.create(payload).await?;
    tracing::info!(user_id = %user.id, "User created");
    Ok(Json(user.into()))
}

pub async fn update_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<UserPatch>,
) -> Result<Json<UserDto>, QuotaError> {
    RequestValidator::validate_user_id(&id)?;
    RequestValidator::validate_user_patch(&payload)?;
    let user = state.users.update(&id, payload).await?;
    Ok(Json(user.into()))
}

pub async fn delete_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, QuotaError> {
    RequestValidator::validate_user_id(&id)?;
    state.users.delete(&id).await?;
    tracing::info!(user_id = %id, "User deleted");
    Ok(StatusCode::OK)
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

/// Readiness check endpoint; quota decisions need the counter store.
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store = state.health.check_counter_store().await;

    if store.is_healthy() {
        (StatusCode::OK, Json(ReadinessResponse::ready(&store.backend)))
    } else {
        let error = store.error.unwrap_or_default();
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse::not_ready(&store.backend, &error)),
        )
    }
}

pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.metrics.snapshot().await)
}
