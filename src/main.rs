// AvWeather API v0.1
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod models;
mod rate_limit;
mod routes;
mod services;

use config::AppConfig;
use rate_limit::RateLimiter;
use routes::AppState;
use services::advisories::AdvisoryClient;
use services::airports::AirportRepo;
use services::awc::AwcPirepProvider;
use services::forecast::ForecastService;
use services::map::MapStore;
use services::provider::WeatherProvider;
use services::stations::StationWeatherClient;
use services::yr::YrProvider;

/// AvWeather API OpenAPI document.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "AvWeather API",
        version = "0.1.0",
        description = "Route-corridor weather briefings for flights. \
            Samples the great-circle route between airports or waypoints, fetches \
            forecasts from yr.no and pilot reports from aviationweather.gov for each \
            sample point, adds endpoint METAR/TAF and the SIGMETs and G-AIRMETs along \
            the corridor, and returns a plain-language briefing with a rendered map.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Forecast", description = "Route weather briefings"),
        (name = "Maps", description = "Rendered corridor maps"),
        (name = "Airports", description = "Airport lookup"),
    ),
    paths(
        routes::health::health_check,
        routes::forecast::create_forecast,
        routes::maps::get_map,
        routes::airports::search_airports,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::forecast::ForecastRequest,
            routes::forecast::WaypointInput,
            routes::forecast::ForecastResponse,
            services::forecast::ForecastSummary,
            services::forecast::SeverityCounts,
            services::briefing::Briefing,
            services::briefing::BriefingStyle,
            services::briefing::HazardSegment,
            services::briefing::Hazard,
            services::stations::StationWeather,
            services::stations::Metar,
            services::stations::Taf,
            services::stations::FlightCategory,
            services::airports::AirportMatch,
            services::airports::AirportRecord,
            models::Severity,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

/// Full application: routes, OpenAPI docs, CORS and request tracing.
fn build_app(state: AppState, limiter: RateLimiter) -> Router {
    // CORS: any origin, GET and POST only
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    routes::router(state, limiter)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "avweather_api=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();
    init_tracing(&config.log_format);

    // Airport dataset for ICAO routes and search
    let airports_path = std::path::Path::new(&config.data_dir).join("airports.csv");
    let airports = AirportRepo::load(&airports_path).unwrap_or_else(|e| {
        tracing::error!(
            "Failed to read airports from {}: {}",
            airports_path.display(),
            e
        );
        AirportRepo::default()
    });
    if airports.is_empty() {
        tracing::warn!("No airports loaded, only waypoint and GPX routes will work");
    }

    // Weather providers, queried concurrently for every sample point
    let mut providers: Vec<Arc<dyn WeatherProvider>> = vec![Arc::new(YrProvider::new(
        &config.yr_base_url,
        &config.yr_user_agent,
        config.http_timeout(),
        config.cache_ttl(),
    ))];
    if config.enable_pireps {
        providers.push(Arc::new(AwcPirepProvider::new(
            &config.awc_base_url,
            config.http_timeout(),
            config.cache_ttl(),
            config.corridor_half_width_nm,
            config.pirep_age_hours,
        )));
    }
    tracing::info!(
        "Weather providers: {}",
        providers
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(", ")
    );

    // Rendered maps live in memory; the sweeper drops expired ones
    let maps = MapStore::new(config.map_ttl());
    tokio::spawn(services::map::run_map_sweeper(maps.clone()));

    let mut forecasts = ForecastService::new(&config, providers, Arc::new(airports), maps);
    if config.enable_airport_weather {
        forecasts = forecasts.with_station_weather(Arc::new(StationWeatherClient::new(
            &config.awc_base_url,
            config.http_timeout(),
            config.cache_ttl(),
        )));
    }
    if config.enable_advisories {
        forecasts = forecasts.with_advisories(Arc::new(AdvisoryClient::new(
            &config.awc_base_url,
            config.http_timeout(),
            config.cache_ttl(),
        )));
    }
    tracing::info!(
        "Airport reports {}, advisories {}",
        if config.enable_airport_weather { "on" } else { "off" },
        if config.enable_advisories { "on" } else { "off" }
    );

    let state = AppState { forecasts };
    let app = build_app(state, RateLimiter::per_minute(config.rate_limit_per_minute));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server terminated unexpectedly");
}
