//! HTTP surface for callers that want a message proxied

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::executor::{ExecuteError, ProxyRequest, WebhookExecutor};
use crate::metrics::AtomicMetrics;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<WebhookExecutor>,
    pub metrics: Arc<AtomicMetrics>,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    messages_proxied: u64,
}

#[derive(Serialize)]
struct ProxyResponse {
    id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform_status: Option<u16>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/proxy", post(proxy_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        messages_proxied: state.metrics.snapshot().messages_proxied,
    })
}

async fn proxy_message(
    State(state): State<AppState>,
    Json(request): Json<ProxyRequest>,
) -> Result<Json<ProxyResponse>, ApiError> {
    let id = state.executor.execute(&request).await?;
    Ok(Json(ProxyResponse { id: id.to_string() }))
}

pub struct ApiError(ExecuteError);

impl From<ExecuteError> for ApiError {
    fn from(err: ExecuteError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after, platform_status) = match &self.0 {
            ExecuteError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                retry_after.map(|d| d.as_millis() as u64),
                None,
            ),
            ExecuteError::AttachmentTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, None, None),
            ExecuteError::AttachmentFetch { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, None, None)
            }
            ExecuteError::PlatformClientError { status, .. }
            | ExecuteError::PlatformServerError { status }
            | ExecuteError::MalformedPlatformResponse { status } => {
                (StatusCode::BAD_GATEWAY, None, Some(*status))
            }
            ExecuteError::WebhookUnavailable(_) | ExecuteError::Transport(_) => {
                (StatusCode::BAD_GATEWAY, None, None)
            }
        };

        if status == StatusCode::BAD_GATEWAY {
            warn!("Proxy failed: {}", self.0);
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            retry_after_ms: retry_after,
            platform_status,
        };
        (status, Json(body)).into_response()
    }
}
