pub mod airports;
pub mod forecast;
pub mod health;
pub mod maps;

use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::rate_limit::{rate_limit, RateLimiter};
use crate::services::forecast::ForecastService;

/// Shared application state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub forecasts: ForecastService,
}

/// Application routes. `/api/*` is rate limited per client; maps and the
/// health check are not.
pub fn router(state: AppState, limiter: RateLimiter) -> Router {
    let api_routes = Router::new()
        .route("/api/forecast", post(forecast::create_forecast))
        .route("/api/airports/search", get(airports::search_airports))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit));

    Router::new()
        .route("/healthz", get(health::health_check))
        .route("/maps/:file", get(maps::get_map))
        .merge(api_routes)
        .with_state(state)
}
