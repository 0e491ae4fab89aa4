//! Rendered map pages.
//!
//! - GET /maps/:file where file is `{id}.html`

use axum::extract::{Path, State};
use axum::response::Html;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;

/// Serve a rendered corridor map.
#[utoipa::path(
    get,
    path = "/maps/{file}",
    tag = "Maps",
    params(
        ("file" = String, Path, description = "Map file name, `{id}.html`"),
    ),
    responses(
        (status = 200, description = "Map page", content_type = "text/html", body = String),
        (status = 404, description = "Unknown or expired map", body = ErrorResponse),
    )
)]
pub async fn get_map(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Html<String>, AppError> {
    let not_found = || AppError::NotFound("Map not found (expired?)".to_string());

    let id = file.strip_suffix(".html").ok_or_else(not_found)?;
    let artifact = state.forecasts.maps().get(id).await.ok_or_else(not_found)?;
    Ok(Html(artifact.html))
}
