use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::aggregator::IncompleteProfileError;
use crate::services::corridor::InvalidRouteError;
use crate::services::gpx::GpxError;
use crate::services::map::RenderError;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid route: {0}")]
    InvalidRoute(#[from] InvalidRouteError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Incomplete weather profile: {0}")]
    IncompleteProfile(#[from] IncompleteProfileError),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Map rendering failed: {0}")]
    Render(#[from] RenderError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidRoute(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::IncompleteProfile(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }

        let message = match &self {
            AppError::InvalidRoute(err) => err.to_string(),
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::UpstreamTimeout(msg) => msg.clone(),
            AppError::IncompleteProfile(err) => err.to_string(),
            AppError::RateLimited { .. } => self.to_string(),
            // Renderer internals stay in the logs
            AppError::Render(_) => "Failed to render the route map".to_string(),
        };

        let mut response = (status, axum::Json(ErrorResponse { error: message })).into_response();
        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<GpxError> for AppError {
    fn from(err: GpxError) -> Self {
        AppError::InvalidRoute(err.into())
    }
}
