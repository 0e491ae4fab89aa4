//! Airport autocomplete.
//!
//! - GET /api/airports/search?q=&limit=

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;
use crate::services::airports::AirportMatch;

const MAX_QUERY_CHARS: usize = 64;
const MAX_LIMIT: usize = 25;
const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AirportSearchQuery {
    /// ICAO/IATA code, name, city or region fragment (1-64 characters)
    pub q: String,
    /// Maximum results, 1-25 (default 10)
    pub limit: Option<usize>,
}

/// Search airports by code, name, municipality or region.
#[utoipa::path(
    get,
    path = "/api/airports/search",
    tag = "Airports",
    params(AirportSearchQuery),
    responses(
        (status = 200, description = "Matches, best first", body = Vec<AirportMatch>),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn search_airports(
    State(state): State<AppState>,
    Query(params): Query<AirportSearchQuery>,
) -> Result<Json<Vec<AirportMatch>>, AppError> {
    let chars = params.q.chars().count();
    if chars == 0 || chars > MAX_QUERY_CHARS {
        return Err(AppError::BadRequest(format!(
            "q must be 1 to {} characters",
            MAX_QUERY_CHARS
        )));
    }
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }

    Ok(Json(state.forecasts.airports().search(&params.q, limit)))
}
