//! Forecast pipeline.
//!
//! Resolves the requested route, samples the corridor, fans out to the weather
//! providers, aggregates the results, writes the briefing and renders the map.
//! Endpoint airport reports and route advisories are fetched alongside the
//! provider fan-out; their failures are listed in the summary and never end
//! the request. Each stage is a plain function in its own module; this one
//! wires them together and decides which failures end the request.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::models::{CorridorProfile, SamplePoint, Severity, TimeWindow, WeatherObservation};
use crate::services::advisories::{AdvisoryClient, AdvisoryProduct, RouteAdvisories};
use crate::services::aggregator::aggregate;
use crate::services::airports::AirportRepo;
use crate::services::briefing::{
    add_reported_conditions, generate_briefing, Briefing, BriefingOptions, SeverityThresholds,
};
use crate::services::corridor::{build_sample_points, InvalidRouteError, Route, Waypoint};
use crate::services::fetcher::{fetch_corridor, FetchSettings};
use crate::services::gpx::parse_route_points;
use crate::services::map::{render_map, MapOverlays, MapStore};
use crate::services::provider::WeatherProvider;
use crate::services::stations::{
    AirportConditions, StationWeather, StationWeatherClient, METAR_SOURCE,
};

/// Upper bound on sample points per request.
pub const MAX_SAMPLE_POINTS: usize = 200;

/// Where the route geometry comes from. Exactly one per request.
#[derive(Debug, Clone)]
pub enum RouteSource {
    Airports {
        origin: String,
        destination: String,
        via: Vec<String>,
    },
    Waypoints(Vec<Waypoint>),
    Gpx(String),
}

/// A validated forecast request.
#[derive(Debug, Clone)]
pub struct ForecastPlan {
    pub source: RouteSource,
    /// Flight level (hundreds of feet)
    pub cruise_fl: u32,
    pub departure_time: Option<DateTime<Utc>>,
    pub groundspeed_kt: Option<f64>,
    pub sample_interval_nm: Option<f64>,
    pub briefing: BriefingOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct SeverityCounts {
    pub calm: usize,
    pub moderate: usize,
    pub severe: usize,
}

impl SeverityCounts {
    fn of(profile: &CorridorProfile, thresholds: &SeverityThresholds) -> Self {
        let mut counts = Self::default();
        for entry in &profile.entries {
            match thresholds.entry_severity(entry) {
                Severity::Calm => counts.calm += 1,
                Severity::Moderate => counts.moderate += 1,
                Severity::Severe => counts.severe += 1,
            }
        }
        counts
    }
}

/// Numbers behind a briefing, returned alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ForecastSummary {
    /// e.g. "KATL → KDEN"
    pub route: String,
    pub distance_nm: f64,
    pub cruise_fl: u32,
    pub departure_time: DateTime<Utc>,
    pub sample_points: usize,
    /// Points with at least one observation of their own
    pub observed_points: usize,
    /// Points filled from a neighbour
    pub filled_points: usize,
    /// Points where every provider failed
    pub unavailable_points: usize,
    /// Set when the request deadline cut the fan-out short
    pub deadline_exceeded: bool,
    /// Observations received per provider
    pub provider_observations: BTreeMap<String, usize>,
    pub severity_counts: SeverityCounts,
    /// Latest METAR and TAF for endpoint airports
    pub airports: Vec<StationWeather>,
    /// SIGMETs and G-AIRMETs touching the corridor at cruise level, per product
    pub advisory_counts: BTreeMap<String, usize>,
    /// Airport or advisory products that could not be fetched
    pub missing_products: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ForecastOutcome {
    pub map_id: String,
    pub briefing: Briefing,
    pub summary: ForecastSummary,
}

/// Everything a forecast run needs, shared across requests.
#[derive(Clone)]
pub struct ForecastService {
    providers: Vec<Arc<dyn WeatherProvider>>,
    stations: Option<Arc<StationWeatherClient>>,
    advisories: Option<Arc<AdvisoryClient>>,
    airports: Arc<AirportRepo>,
    maps: MapStore,
    thresholds: SeverityThresholds,
    fetch: FetchSettings,
    sample_interval_nm: f64,
    corridor_half_width_nm: f64,
    default_groundspeed_kt: f64,
    max_missing_fraction: f64,
}

impl ForecastService {
    pub fn new(
        config: &AppConfig,
        providers: Vec<Arc<dyn WeatherProvider>>,
        airports: Arc<AirportRepo>,
        maps: MapStore,
    ) -> Self {
        Self {
            providers,
            stations: None,
            advisories: None,
            airports,
            maps,
            thresholds: SeverityThresholds::default(),
            fetch: FetchSettings::from_config(config),
            sample_interval_nm: config.sample_interval_nm,
            corridor_half_width_nm: config.corridor_half_width_nm,
            default_groundspeed_kt: config.default_groundspeed_kt,
            max_missing_fraction: config.max_missing_fraction,
        }
    }

    pub fn with_fetch_settings(mut self, fetch: FetchSettings) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_station_weather(mut self, stations: Arc<StationWeatherClient>) -> Self {
        self.stations = Some(stations);
        self
    }

    pub fn with_advisories(mut self, advisories: Arc<AdvisoryClient>) -> Self {
        self.advisories = Some(advisories);
        self
    }

    pub fn maps(&self) -> &MapStore {
        &self.maps
    }

    pub fn airports(&self) -> &AirportRepo {
        &self.airports
    }

    /// Turn a route source into waypoints.
    pub fn resolve_waypoints(&self, source: &RouteSource) -> Result<Vec<Waypoint>, AppError> {
        match source {
            RouteSource::Airports {
                origin,
                destination,
                via,
            } => {
                let origin = origin.trim().to_uppercase();
                let destination = destination.trim().to_uppercase();
                if origin == destination {
                    return Err(InvalidRouteError::SameOriginDestination.into());
                }
                std::iter::once(&origin)
                    .chain(via.iter())
                    .chain(std::iter::once(&destination))
                    .map(|code| self.airport_waypoint(code))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(AppError::from)
            }
            RouteSource::Waypoints(waypoints) => Ok(waypoints.clone()),
            RouteSource::Gpx(document) => Ok(parse_route_points(document)?),
        }
    }

    fn airport_waypoint(&self, code: &str) -> Result<Waypoint, InvalidRouteError> {
        let code = code.trim().to_uppercase();
        self.airports
            .get_by_icao(&code)
            .map(|a| Waypoint::new(a.latitude, a.longitude).named(&a.icao))
            .ok_or(InvalidRouteError::UnknownAirport(code))
    }

    /// Run the whole pipeline and store the rendered map.
    pub async fn run(&self, plan: ForecastPlan) -> Result<ForecastOutcome, AppError> {
        let waypoints = self.resolve_waypoints(&plan.source)?;
        let route = Route::new(
            waypoints,
            f64::from(plan.cruise_fl) * 100.0,
            plan.departure_time.unwrap_or_else(Utc::now),
            plan.groundspeed_kt.unwrap_or(self.default_groundspeed_kt),
        )?;

        let interval = plan.sample_interval_nm.unwrap_or(self.sample_interval_nm);
        if interval.is_finite()
            && interval > 0.0
            && route.total_distance_nm() / interval > MAX_SAMPLE_POINTS as f64
        {
            return Err(InvalidRouteError::parameter(
                "sample_interval_nm",
                format!(
                    "{:.1} NM would need more than {} sample points for this route",
                    interval, MAX_SAMPLE_POINTS
                ),
            )
            .into());
        }
        let points = build_sample_points(&route, interval)?;

        tracing::info!(
            "Forecast for {} at FL{}: {} sample points, {} providers",
            route.label(),
            plan.cruise_fl,
            points.len(),
            self.providers.len()
        );

        let stations = self.endpoint_stations(&route);
        let (fetched, airport_conditions, advisories) = tokio::join!(
            fetch_corridor(&self.providers, &points, &self.fetch),
            self.airport_conditions(&stations),
            self.route_advisories(&points, plan.cruise_fl),
        );
        let mut observations = fetched.observations();
        if fetched.deadline_exceeded && observations.is_empty() {
            return Err(AppError::UpstreamTimeout(
                "weather providers did not answer before the request deadline, please try again"
                    .to_string(),
            ));
        }
        let metars = self.metar_observations(&route, &points, &airport_conditions);
        let metar_count = metars.len();
        observations.extend(metars);

        let profile = aggregate(
            &points,
            &observations,
            self.max_missing_fraction,
            fetched.deadline_exceeded,
        )?;

        let mut briefing =
            generate_briefing(&route.label(), &profile, plan.briefing, &self.thresholds);
        add_reported_conditions(
            &mut briefing,
            &airport_conditions,
            &advisories,
            plan.briefing.calm,
        );

        let overlays = MapOverlays {
            airports: airport_conditions,
            advisories,
            calm: plan.briefing.calm,
        };
        let artifact = render_map(
            &route,
            &profile,
            &briefing,
            &self.thresholds,
            self.corridor_half_width_nm,
            &overlays,
        )?;
        let map_id = self.maps.insert(artifact).await;

        let mut provider_observations = fetched.provider_counts();
        if metar_count > 0 {
            provider_observations.insert(METAR_SOURCE.to_string(), metar_count);
        }

        let summary = ForecastSummary {
            route: route.label(),
            distance_nm: crate::helpers::round_to(route.total_distance_nm(), 1),
            cruise_fl: plan.cruise_fl,
            departure_time: route.departure_time(),
            sample_points: points.len(),
            observed_points: profile.observed_points,
            filled_points: profile.filled_points,
            unavailable_points: fetched.unavailable_points(),
            deadline_exceeded: fetched.deadline_exceeded,
            provider_observations,
            severity_counts: SeverityCounts::of(&profile, &self.thresholds),
            advisory_counts: overlays.advisories.counts(),
            missing_products: overlays
                .airports
                .missing_products
                .iter()
                .chain(overlays.advisories.missing_products.iter())
                .cloned()
                .collect(),
            airports: overlays.airports.stations,
        };

        tracing::info!(
            "Forecast {} ready: severity {}, {} observed / {} filled points",
            map_id,
            briefing.severity.as_str(),
            summary.observed_points,
            summary.filled_points
        );

        Ok(ForecastOutcome {
            map_id,
            briefing,
            summary,
        })
    }

    /// ICAO codes of the route ends that are known airports.
    fn endpoint_stations(&self, route: &Route) -> Vec<String> {
        [route.origin(), route.destination()]
            .into_iter()
            .filter_map(|wp| wp.name.as_deref())
            .map(|name| name.trim().to_uppercase())
            .filter(|code| self.airports.get_by_icao(code).is_some())
            .collect()
    }

    async fn airport_conditions(&self, stations: &[String]) -> AirportConditions {
        let Some(client) = &self.stations else {
            return AirportConditions::default();
        };
        match tokio::time::timeout(self.fetch.deadline, client.conditions(stations)).await {
            Ok(conditions) => conditions,
            Err(_) => {
                tracing::warn!(
                    "Airport reports for {} missed the request deadline",
                    stations.join(", ")
                );
                AirportConditions {
                    stations: Vec::new(),
                    missing_products: vec!["metar".to_string(), "taf".to_string()],
                }
            }
        }
    }

    async fn route_advisories(&self, points: &[SamplePoint], cruise_fl: u32) -> RouteAdvisories {
        let Some(client) = &self.advisories else {
            return RouteAdvisories::default();
        };
        let lookup = client.along_route(points, f64::from(cruise_fl), self.corridor_half_width_nm);
        match tokio::time::timeout(self.fetch.deadline, lookup).await {
            Ok(advisories) => advisories,
            Err(_) => {
                tracing::warn!("Advisory lookup missed the request deadline");
                RouteAdvisories {
                    advisories: Vec::new(),
                    missing_products: AdvisoryProduct::ALL
                        .iter()
                        .map(|p| p.as_str().to_string())
                        .collect(),
                }
            }
        }
    }

    /// Surface visibility at the first and last sample point from the
    /// endpoint METARs, when they fall inside that point's window.
    fn metar_observations(
        &self,
        route: &Route,
        points: &[SamplePoint],
        conditions: &AirportConditions,
    ) -> Vec<WeatherObservation> {
        [
            (route.origin(), points.first()),
            (route.destination(), points.last()),
        ]
        .into_iter()
        .filter_map(|(wp, point)| {
            let point = point?;
            let code = wp.name.as_deref()?.trim().to_uppercase();
            let metar = conditions.station(&code)?.metar.as_ref()?;
            metar.to_observation(
                point,
                TimeWindow::around(point.eta, self.fetch.window_half_width),
            )
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::aggregator::IncompleteProfileError;
    use crate::services::briefing::BriefingStyle;
    use crate::services::corridor::EARTH_RADIUS_NM;
    use crate::services::provider::ProviderError;
    use crate::services::stations::FlightCategory;
    use crate::services::test_support::{departure, ScriptedProvider};
    use std::time::Duration;

    const AIRPORTS: &str = "\
icao,iata,name,lat,lon,elevation_ft,municipality,region,scheduled_service,type
KATL,ATL,Hartsfield-Jackson Atlanta International Airport,33.6367,-84.4281,1026,Atlanta,US-GA,yes,large_airport
KDEN,DEN,Denver International Airport,39.8617,-104.6731,5434,Denver,US-CO,yes,large_airport
KMCI,MCI,Kansas City International Airport,39.2976,-94.7139,1026,Kansas City,US-MO,yes,large_airport
";

    fn settings() -> FetchSettings {
        FetchSettings {
            attempt_timeout: Duration::from_millis(500),
            max_retries: 1,
            backoff: Duration::from_millis(1),
            concurrency: 4,
            deadline: Duration::from_secs(5),
            window_half_width: chrono::Duration::minutes(90),
        }
    }

    fn service(providers: Vec<Arc<dyn WeatherProvider>>) -> ForecastService {
        let mut config = AppConfig::from_env();
        config.sample_interval_nm = 100.0;
        config.max_missing_fraction = 0.5;
        let airports = AirportRepo::from_reader(AIRPORTS.as_bytes()).unwrap();
        ForecastService::new(
            &config,
            providers,
            Arc::new(airports),
            MapStore::new(Duration::from_secs(3600)),
        )
        .with_fetch_settings(settings())
    }

    fn plan(source: RouteSource) -> ForecastPlan {
        ForecastPlan {
            source,
            cruise_fl: 350,
            departure_time: Some(departure()),
            groundspeed_kt: Some(400.0),
            sample_interval_nm: Some(100.0),
            briefing: BriefingOptions::default(),
        }
    }

    fn airports(origin: &str, destination: &str) -> RouteSource {
        RouteSource::Airports {
            origin: origin.to_string(),
            destination: destination.to_string(),
            via: Vec::new(),
        }
    }

    /// Two equator waypoints exactly `nm` apart.
    fn equator_route(nm: f64) -> RouteSource {
        let degrees = nm / (EARTH_RADIUS_NM * std::f64::consts::PI / 180.0);
        RouteSource::Waypoints(vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, degrees)])
    }

    #[tokio::test]
    async fn test_airport_route_produces_stored_map() {
        let yr = Arc::new(ScriptedProvider::ok("yr"));
        let svc = service(vec![yr.clone() as Arc<dyn WeatherProvider>]);

        let outcome = svc.run(plan(airports(" katl", "KDEN "))).await.unwrap();

        assert_eq!(outcome.summary.route, "KATL → KDEN");
        assert!((outcome.summary.distance_nm - 1040.0).abs() < 15.0);
        assert_eq!(outcome.summary.sample_points, 11);
        assert_eq!(outcome.summary.observed_points, 11);
        assert_eq!(outcome.summary.filled_points, 0);
        assert_eq!(outcome.summary.provider_observations["yr"], 11);
        assert_eq!(outcome.summary.severity_counts.calm, 11);
        assert_eq!(outcome.briefing.severity, Severity::Calm);
        assert_eq!(yr.calls(), 11);

        let map = svc.maps().get(&outcome.map_id).await.unwrap();
        assert!(map.html.contains("KATL → KDEN"));
    }

    #[tokio::test]
    async fn test_five_hundred_miles_at_hundred_mile_interval_gives_five_points() {
        let svc = service(vec![Arc::new(ScriptedProvider::ok("yr"))]);
        let outcome = svc.run(plan(equator_route(500.0))).await.unwrap();
        assert_eq!(outcome.summary.sample_points, 5);
    }

    #[tokio::test]
    async fn test_via_airports_are_visited_in_order() {
        let svc = service(vec![]);
        let waypoints = svc
            .resolve_waypoints(&RouteSource::Airports {
                origin: "KATL".into(),
                destination: "KDEN".into(),
                via: vec!["kmci".into()],
            })
            .unwrap();
        let names: Vec<_> = waypoints.iter().filter_map(|w| w.name.clone()).collect();
        assert_eq!(names, ["KATL", "KMCI", "KDEN"]);
    }

    #[tokio::test]
    async fn test_route_errors_are_invalid_route() {
        let svc = service(vec![Arc::new(ScriptedProvider::ok("yr"))]);

        let err = svc.run(plan(airports("KATL", "KZZZ"))).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidRoute(InvalidRouteError::UnknownAirport(ref code)) if code == "KZZZ"
        ));

        let err = svc.run(plan(airports("katl", "KATL"))).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidRoute(InvalidRouteError::SameOriginDestination)
        ));

        let err = svc
            .run(plan(RouteSource::Gpx("<gpx></gpx>".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRoute(InvalidRouteError::Gpx(_))));
    }

    #[tokio::test]
    async fn test_tiny_interval_is_rejected() {
        let svc = service(vec![Arc::new(ScriptedProvider::ok("yr"))]);
        let mut request = plan(equator_route(500.0));
        request.sample_interval_nm = Some(0.5);
        let err = svc.run(request).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidRoute(InvalidRouteError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_all_providers_failing_is_incomplete_profile() {
        let failing = ScriptedProvider::failing("yr", ProviderError::Permanent("403".into()));
        let svc = service(vec![Arc::new(failing)]);
        let err = svc.run(plan(equator_route(500.0))).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::IncompleteProfile(IncompleteProfileError::NoData { total: 5 })
        ));
        assert_eq!(svc.maps().len().await, 0);
    }

    #[tokio::test]
    async fn test_deadline_with_no_data_is_upstream_timeout() {
        let slow = ScriptedProvider::ok("yr").with_delay(Duration::from_secs(2));
        let svc = service(vec![Arc::new(slow)]).with_fetch_settings(FetchSettings {
            attempt_timeout: Duration::from_secs(5),
            deadline: Duration::from_millis(100),
            ..settings()
        });
        let err = svc.run(plan(equator_route(500.0))).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamTimeout(_)));
    }

    #[tokio::test]
    async fn test_partial_deadline_fills_abandoned_points() {
        // Points 3 and 4 never answer before the deadline
        let slow_tail = ScriptedProvider::ok("yr").with_delay_from(3, Duration::from_secs(5));
        let svc = service(vec![Arc::new(slow_tail)]).with_fetch_settings(FetchSettings {
            attempt_timeout: Duration::from_secs(10),
            deadline: Duration::from_millis(300),
            ..settings()
        });

        let outcome = svc.run(plan(equator_route(500.0))).await.unwrap();

        assert!(outcome.summary.deadline_exceeded);
        assert_eq!(outcome.summary.sample_points, 5);
        assert_eq!(outcome.summary.observed_points, 3);
        assert_eq!(outcome.summary.filled_points, 2);
        assert!(outcome.summary.filled_points > 0);
        assert!(outcome.briefing.low_confidence);
        assert!(svc.maps().get(&outcome.map_id).await.is_some());
    }

    async fn aviationweather_mock() -> wiremock::MockServer {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/data/metar"))
            .and(query_param("ids", "KATL,KDEN"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "icaoId": "KATL", "rawOb": "KATL 010752Z 27008KT 10SM FEW250 12/02 A3012",
                  "fltCat": "VFR", "obsTime": 1772351520, "visib": "10+",
                  "lat": 33.63, "lon": -84.44 },
                { "icaoId": "KDEN", "rawOb": "KDEN 010753Z 02012KT 1 1/2SM -SN BR OVC008 M03/M04 A2990",
                  "fltCat": "IFR", "obsTime": 1772351580, "visib": "1 1/2",
                  "lat": 39.85, "lon": -104.66 }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/data/taf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "icaoId": "KDEN", "rawTAF": "TAF KDEN 010520Z 0106/0212 02012KT 2SM -SN OVC010",
                  "issueTime": "2026-03-01T05:20:00Z" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/data/gairmet"))
            .and(query_param("product", "tango"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": { "type": "Polygon", "coordinates": [[
                        [-105.7, 38.9], [-103.7, 38.9], [-103.7, 40.9], [-105.7, 40.9], [-105.7, 38.9]
                    ]] },
                    "properties": { "hazard": "TURB-HI", "base": "FL250", "top": "FL410" }
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        server
    }

    fn with_aviationweather(svc: ForecastService, server: &wiremock::MockServer) -> ForecastService {
        let base = format!("{}/api/data", server.uri());
        svc.with_station_weather(Arc::new(StationWeatherClient::new(
            &base,
            Duration::from_secs(2),
            Duration::from_secs(60),
        )))
        .with_advisories(Arc::new(AdvisoryClient::new(
            &base,
            Duration::from_secs(2),
            Duration::from_secs(60),
        )))
    }

    #[tokio::test]
    async fn test_airport_reports_and_advisories_reach_summary_and_map() {
        let server = aviationweather_mock().await;
        let svc = with_aviationweather(
            service(vec![Arc::new(ScriptedProvider::ok("yr"))]),
            &server,
        );

        let outcome = svc.run(plan(airports("KATL", "KDEN"))).await.unwrap();
        let summary = &outcome.summary;

        assert!(summary.missing_products.is_empty());
        let icaos: Vec<&str> = summary.airports.iter().map(|s| s.icao.as_str()).collect();
        assert_eq!(icaos, ["KATL", "KDEN"]);
        assert_eq!(summary.airports[1].flight_category(), Some(FlightCategory::Ifr));
        assert!(summary.airports[1].taf.is_some());
        assert_eq!(summary.advisory_counts["tango"], 1);
        assert_eq!(summary.advisory_counts["sigmet"], 0);

        // Only the departure METAR falls inside its point's window
        assert_eq!(summary.provider_observations["metar"], 1);
        assert_eq!(summary.provider_observations["yr"], 11);

        assert!(outcome.briefing.text.contains("KDEN is reporting IFR conditions"));
        assert!(outcome.briefing.text.contains("1 G-AIRMET Tango (turbulence)"));

        let map = svc.maps().get(&outcome.map_id).await.unwrap();
        assert!(map.html.contains("KATL 010752Z"));
        assert!(map.html.contains("G-AIRMET (Tango - Turb)"));
        assert!(map.html.contains(FlightCategory::Ifr.color()));
    }

    #[tokio::test]
    async fn test_failed_airport_reports_do_not_fail_the_forecast() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let svc = with_aviationweather(
            service(vec![Arc::new(ScriptedProvider::ok("yr"))]),
            &server,
        );

        let outcome = svc.run(plan(airports("KATL", "KDEN"))).await.unwrap();

        assert_eq!(
            outcome.summary.missing_products,
            ["metar", "taf", "sigmet", "tango", "zulu", "sierra"]
        );
        assert!(outcome.summary.airports.iter().all(|s| s.metar.is_none()));
        assert!(!outcome.summary.provider_observations.contains_key("metar"));
        assert!(outcome.briefing.text.contains("could not be retrieved"));
    }

    #[tokio::test]
    async fn test_waypoint_routes_skip_airport_reports() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/data/metar"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        let svc = with_aviationweather(
            service(vec![Arc::new(ScriptedProvider::ok("yr"))]),
            &server,
        );

        let outcome = svc.run(plan(equator_route(500.0))).await.unwrap();
        assert!(outcome.summary.airports.is_empty());
        assert!(outcome.summary.missing_products.is_empty());
    }

    #[tokio::test]
    async fn test_gpx_route_and_sectioned_briefing() {
        let svc = service(vec![
            Arc::new(ScriptedProvider::ok("yr").with_weather(60.0, 0.8)),
            Arc::new(ScriptedProvider::ok("pirep").empty()),
        ]);
        let gpx = r#"<gpx><rte>
            <rtept lat="0.0" lon="0.0"><name>A</name></rtept>
            <rtept lat="0.0" lon="3.0"><name>B</name></rtept>
        </rte></gpx>"#;
        let mut request = plan(RouteSource::Gpx(gpx.into()));
        request.briefing.style = BriefingStyle::Sectioned;

        let outcome = svc.run(request).await.unwrap();

        assert_eq!(outcome.summary.route, "A → B");
        assert_eq!(outcome.briefing.severity, Severity::Severe);
        assert_eq!(outcome.briefing.style, BriefingStyle::Sectioned);
        assert!(outcome.briefing.text.contains("What the data shows"));
        assert!(!outcome.summary.provider_observations.contains_key("pirep"));
        assert_eq!(
            outcome.summary.severity_counts.severe,
            outcome.summary.sample_points
        );
    }
}
