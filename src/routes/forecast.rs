//! Forecast HTTP endpoint.
//!
//! - POST /api/forecast?briefing=v1|v2

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;
use crate::services::briefing::{Briefing, BriefingOptions, BriefingStyle};
use crate::services::corridor::Waypoint;
use crate::services::forecast::{ForecastPlan, ForecastSummary, RouteSource};

/// Header consulted when the `briefing` query parameter is absent.
pub const BRIEFING_VERSION_HEADER: &str = "X-Briefing-Version";

/// Highest accepted cruise flight level.
const MAX_CRUISE_FL: u32 = 600;

#[derive(Debug, Deserialize, ToSchema)]
pub struct WaypointInput {
    /// Latitude (WGS84)
    pub lat: f64,
    /// Longitude (WGS84)
    pub lon: f64,
    /// Altitude at this point in feet; defaults to cruise
    pub altitude_ft: Option<f64>,
    pub name: Option<String>,
}

impl From<WaypointInput> for Waypoint {
    fn from(input: WaypointInput) -> Self {
        let waypoint = Waypoint::new(input.lat, input.lon);
        let waypoint = match input.altitude_ft {
            Some(altitude_ft) => waypoint.at_altitude(altitude_ft),
            None => waypoint,
        };
        match input.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => waypoint.named(name),
            _ => waypoint,
        }
    }
}

/// Forecast request. Give the route as ICAO airports, as waypoints or as a
/// GPX document, exactly one of the three.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ForecastRequest {
    /// Origin ICAO code (with `destination`)
    pub origin: Option<String>,
    /// Destination ICAO code (with `origin`)
    pub destination: Option<String>,
    /// Intermediate ICAO codes, in order
    #[serde(default)]
    pub via: Vec<String>,
    pub waypoints: Option<Vec<WaypointInput>>,
    /// GPX document with route, track or waypoint points
    pub gpx: Option<String>,
    /// Cruise flight level, 0..=600 (e.g. 340)
    pub cruise_fl: u32,
    /// Passenger-friendly tone
    #[serde(default = "default_calm")]
    pub calm: bool,
    /// Off-block time; defaults to now
    pub departure_time: Option<DateTime<Utc>>,
    pub groundspeed_kt: Option<f64>,
    pub sample_interval_nm: Option<f64>,
}

fn default_calm() -> bool {
    true
}

impl ForecastRequest {
    fn into_plan(self, style: BriefingStyle) -> Result<ForecastPlan, AppError> {
        if self.cruise_fl > MAX_CRUISE_FL {
            return Err(AppError::BadRequest(format!(
                "cruise_fl must be between 0 and {}",
                MAX_CRUISE_FL
            )));
        }

        let airports = match (self.origin, self.destination) {
            (Some(origin), Some(destination)) => Some(RouteSource::Airports {
                origin,
                destination,
                via: self.via,
            }),
            (None, None) => None,
            _ => {
                return Err(AppError::BadRequest(
                    "origin and destination must be given together".to_string(),
                ))
            }
        };
        let waypoints = self
            .waypoints
            .map(|wps| RouteSource::Waypoints(wps.into_iter().map(Waypoint::from).collect()));
        let gpx = self.gpx.map(RouteSource::Gpx);

        let mut sources = [airports, waypoints, gpx].into_iter().flatten();
        let source = match (sources.next(), sources.next()) {
            (Some(source), None) => source,
            (None, _) => {
                return Err(AppError::BadRequest(
                    "a route is required: origin/destination, waypoints or gpx".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(AppError::BadRequest(
                    "give only one of origin/destination, waypoints or gpx".to_string(),
                ))
            }
        };

        Ok(ForecastPlan {
            source,
            cruise_fl: self.cruise_fl,
            departure_time: self.departure_time,
            groundspeed_kt: self.groundspeed_kt,
            sample_interval_nm: self.sample_interval_nm,
            briefing: BriefingOptions {
                style,
                calm: self.calm,
            },
        })
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ForecastQuery {
    /// Briefing version: "v1" (summary) or "v2" (sectioned)
    pub briefing: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ForecastResponse {
    /// Map id
    pub id: String,
    /// Relative URL of the rendered map page
    pub map_url: String,
    pub briefing: Briefing,
    pub summary: ForecastSummary,
}

/// Query parameter first, then header, then v1.
fn briefing_style(query: Option<&str>, headers: &HeaderMap) -> Result<BriefingStyle, AppError> {
    let requested = query
        .filter(|v| !v.trim().is_empty())
        .or_else(|| {
            headers
                .get(BRIEFING_VERSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.trim().is_empty())
        });
    match requested {
        Some(version) => version.parse().map_err(AppError::BadRequest),
        None => Ok(BriefingStyle::default()),
    }
}

/// Build a route-corridor weather briefing and map.
#[utoipa::path(
    post,
    path = "/api/forecast",
    tag = "Forecast",
    params(
        ForecastQuery,
        ("X-Briefing-Version" = Option<String>, Header, description = "Briefing version when the query parameter is absent"),
    ),
    request_body = ForecastRequest,
    responses(
        (status = 200, description = "Briefing, summary and map link", body = ForecastResponse),
        (status = 400, description = "Invalid route or request", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
        (status = 502, description = "Too little weather data for the corridor", body = ErrorResponse),
    )
)]
pub async fn create_forecast(
    State(state): State<AppState>,
    Query(query): Query<ForecastQuery>,
    headers: HeaderMap,
    payload: Result<Json<ForecastRequest>, JsonRejection>,
) -> Result<Json<ForecastResponse>, AppError> {
    let style = briefing_style(query.briefing.as_deref(), &headers)?;
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let plan = request.into_plan(style)?;

    let outcome = state.forecasts.run(plan).await?;

    Ok(Json(ForecastResponse {
        map_url: format!("/maps/{}.html", outcome.map_id),
        id: outcome.map_id,
        briefing: outcome.briefing,
        summary: outcome.summary,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request(json: serde_json::Value) -> ForecastRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_query_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(BRIEFING_VERSION_HEADER, HeaderValue::from_static("v1"));
        assert_eq!(
            briefing_style(Some("v2"), &headers).unwrap(),
            BriefingStyle::Sectioned
        );
        assert_eq!(briefing_style(None, &headers).unwrap(), BriefingStyle::Summary);
        assert_eq!(
            briefing_style(None, &HeaderMap::new()).unwrap(),
            BriefingStyle::Summary
        );
    }

    #[test]
    fn test_unknown_briefing_version_is_bad_request() {
        let err = briefing_style(Some("v3"), &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_airport_request_becomes_plan() {
        let plan = request(serde_json::json!({
            "origin": "KATL", "destination": "KDEN", "via": ["KMCI"], "cruise_fl": 340
        }))
        .into_plan(BriefingStyle::Summary)
        .unwrap();
        assert!(plan.briefing.calm);
        assert_eq!(plan.cruise_fl, 340);
        assert!(matches!(
            plan.source,
            RouteSource::Airports { ref via, .. } if via == &["KMCI".to_string()]
        ));
    }

    #[test]
    fn test_exactly_one_route_source() {
        let none = request(serde_json::json!({ "cruise_fl": 340 }));
        assert!(matches!(
            none.into_plan(BriefingStyle::Summary),
            Err(AppError::BadRequest(_))
        ));

        let two = request(serde_json::json!({
            "origin": "KATL", "destination": "KDEN", "gpx": "<gpx/>", "cruise_fl": 340
        }));
        assert!(matches!(
            two.into_plan(BriefingStyle::Summary),
            Err(AppError::BadRequest(_))
        ));

        let half = request(serde_json::json!({ "origin": "KATL", "cruise_fl": 340 }));
        assert!(matches!(
            half.into_plan(BriefingStyle::Summary),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_cruise_level_is_bounded() {
        let high = request(serde_json::json!({
            "waypoints": [{"lat": 0.0, "lon": 0.0}, {"lat": 0.0, "lon": 1.0}],
            "cruise_fl": 700
        }));
        assert!(matches!(
            high.into_plan(BriefingStyle::Summary),
            Err(AppError::BadRequest(_))
        ));
    }
}
