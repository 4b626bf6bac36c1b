//! REST endpoints for session status, profile completion, and verification
//! resends.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ProviderError, RecoveryAction, UserNotice};
use crate::identity::Identity;
use crate::profile::{ProfileRecord, ProfileUpdate};
use crate::runtime::SessionRuntime;

/// Shared state for session routes.
#[derive(Clone)]
pub struct SessionRouteState {
    pub runtime: Arc<SessionRuntime>,
}

/// Response body for `GET /api/session`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatus {
    pub signed_in: bool,
    pub is_loading: bool,
    pub onboarding_complete: bool,
    pub identity: Option<Identity>,
    pub profile: Option<ProfileRecord>,
    pub notice: Option<UserNotice>,
}

#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    action: Option<RecoveryAction>,
}

/// An [`Error`] rendered as an HTTP response.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            Error::NotSignedIn => (StatusCode::UNAUTHORIZED, "not_signed_in"),
            Error::Provider(ProviderError::RateLimited { .. }) => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limited")
            }
            Error::Provider(_) => (StatusCode::BAD_GATEWAY, "identity_provider_error"),
            Error::Store(_) | Error::Creation(_) => (StatusCode::BAD_GATEWAY, "profile_store_error"),
            Error::Link(_) => (StatusCode::BAD_REQUEST, "invalid_link"),
            Error::Config(_) | Error::Unexpected(_) => {
                tracing::error!(error = %self.0, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };
        let notice = UserNotice::from(&self.0);
        let body = ErrorBody {
            error,
            message: notice.message,
            action: Some(notice.action),
        };
        (status, Json(body)).into_response()
    }
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/session
async fn get_session(State(state): State<SessionRouteState>) -> Json<SessionStatus> {
    let session = state.runtime.store().state();
    Json(SessionStatus {
        signed_in: session.is_signed_in(),
        is_loading: session.is_loading,
        onboarding_complete: session.is_onboarding_complete(),
        identity: session.identity,
        profile: session.profile,
        notice: session.notice,
    })
}

/// POST /api/profile
///
/// Profile-completion form submission. Responds with the updated record;
/// the router takes care of leaving the form.
async fn submit_profile(
    State(state): State<SessionRouteState>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ProfileRecord>, ApiError> {
    let record = state.runtime.profile_form().submit(update).await?;
    Ok(Json(record))
}

/// POST /api/profile/retry
async fn retry_profile(
    State(state): State<SessionRouteState>,
) -> Result<Json<ProfileRecord>, ApiError> {
    let record = state.runtime.retry_profile().await?;
    Ok(Json(record))
}

/// POST /api/auth/resend
async fn resend_verification(
    State(state): State<SessionRouteState>,
    Json(request): Json<ResendRequest>,
) -> Result<StatusCode, ApiError> {
    state.runtime.resend_verification(&request.email).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Build the session REST routes.
pub fn session_routes(state: SessionRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/session", get(get_session))
        .route("/api/profile", post(submit_profile))
        .route("/api/profile/retry", post(retry_profile))
        .route("/api/auth/resend", post(resend_verification))
        .with_state(state)
}
