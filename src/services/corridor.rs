//! Route corridor builder.
//!
//! Validates a flight route and samples it at regular distance intervals along
//! the great-circle legs between waypoints. Each sample gets an ETA derived from
//! the assumed groundspeed, which is what the weather providers are queried for.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::SamplePoint;

/// Mean Earth radius in nautical miles.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Consecutive waypoints closer than this are treated as the same point.
const MIN_SEPARATION_NM: f64 = 0.01;

/// Accepted groundspeed range in knots.
const MIN_GROUNDSPEED_KT: f64 = 1.0;
const MAX_GROUNDSPEED_KT: f64 = 2000.0;

/// Guards against float noise pushing an exact multiple of the interval up by one.
const SAMPLE_COUNT_EPSILON: f64 = 1e-9;

/// Client-side route problems. Surfaced to callers as a 400.
#[derive(Debug, Error, PartialEq)]
pub enum InvalidRouteError {
    #[error("a route needs at least two distinct points, got {0}")]
    TooFewPoints(usize),
    #[error("waypoint {index} has out-of-range coordinates ({latitude}, {longitude})")]
    CoordinateOutOfRange {
        index: usize,
        latitude: f64,
        longitude: f64,
    },
    #[error("waypoint {index} repeats the previous waypoint")]
    DuplicatePoint { index: usize },
    #[error("leg ending at waypoint {index} joins antipodal points, the great circle is undefined")]
    AntipodalLeg { index: usize },
    #[error("origin and destination must be different")]
    SameOriginDestination,
    #[error("unknown airport: {0}")]
    UnknownAirport(String),
    #[error("invalid {field}: {message}")]
    InvalidParameter { field: String, message: String },
    #[error("unreadable GPX route: {0}")]
    Gpx(String),
}

impl InvalidRouteError {
    pub fn parameter(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// A route vertex: airport, fix or GPX point.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Waypoint {
    /// Latitude (WGS84)
    pub latitude: f64,
    /// Longitude (WGS84)
    pub longitude: f64,
    /// Altitude in feet; `None` means "at cruise altitude"
    pub altitude_ft: Option<f64>,
    /// ICAO code or fix name, when known
    pub name: Option<String>,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_ft: None,
            name: None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn at_altitude(mut self, altitude_ft: f64) -> Self {
        self.altitude_ft = Some(altitude_ft);
        self
    }

    fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{:.2},{:.2}", self.latitude, self.longitude))
    }
}

/// A validated flight route.
#[derive(Debug, Clone)]
pub struct Route {
    waypoints: Vec<Waypoint>,
    cruise_altitude_ft: f64,
    departure_time: DateTime<Utc>,
    groundspeed_kt: f64,
    /// Cumulative distance at each waypoint; `leg_ends[0] == 0`.
    leg_ends: Vec<f64>,
}

impl Route {
    pub fn new(
        waypoints: Vec<Waypoint>,
        cruise_altitude_ft: f64,
        departure_time: DateTime<Utc>,
        groundspeed_kt: f64,
    ) -> Result<Self, InvalidRouteError> {
        if waypoints.len() < 2 {
            return Err(InvalidRouteError::TooFewPoints(waypoints.len()));
        }
        if !(MIN_GROUNDSPEED_KT..=MAX_GROUNDSPEED_KT).contains(&groundspeed_kt) {
            return Err(InvalidRouteError::parameter(
                "groundspeed_kt",
                format!(
                    "must be between {} and {} kt",
                    MIN_GROUNDSPEED_KT, MAX_GROUNDSPEED_KT
                ),
            ));
        }
        if !cruise_altitude_ft.is_finite() || cruise_altitude_ft < 0.0 {
            return Err(InvalidRouteError::parameter(
                "cruise_altitude_ft",
                "must be a non-negative number",
            ));
        }

        for (index, wp) in waypoints.iter().enumerate() {
            if !valid_coordinates(wp.latitude, wp.longitude) {
                return Err(InvalidRouteError::CoordinateOutOfRange {
                    index,
                    latitude: wp.latitude,
                    longitude: wp.longitude,
                });
            }
            if let Some(alt) = wp.altitude_ft {
                if !alt.is_finite() {
                    return Err(InvalidRouteError::parameter(
                        "altitude_ft",
                        format!("waypoint {} altitude is not a number", index),
                    ));
                }
            }
        }

        let mut leg_ends = Vec::with_capacity(waypoints.len());
        leg_ends.push(0.0);
        for index in 1..waypoints.len() {
            let a = &waypoints[index - 1];
            let b = &waypoints[index];
            let d = haversine_nm(a.latitude, a.longitude, b.latitude, b.longitude);
            if d < MIN_SEPARATION_NM {
                return Err(InvalidRouteError::DuplicatePoint { index });
            }
            if d > std::f64::consts::PI * EARTH_RADIUS_NM - 1.0 {
                return Err(InvalidRouteError::AntipodalLeg { index });
            }
            leg_ends.push(leg_ends[index - 1] + d);
        }

        Ok(Self {
            waypoints,
            cruise_altitude_ft,
            departure_time,
            groundspeed_kt,
            leg_ends,
        })
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn origin(&self) -> &Waypoint {
        &self.waypoints[0]
    }

    pub fn destination(&self) -> &Waypoint {
        &self.waypoints[self.waypoints.len() - 1]
    }

    pub fn cruise_altitude_ft(&self) -> f64 {
        self.cruise_altitude_ft
    }

    pub fn departure_time(&self) -> DateTime<Utc> {
        self.departure_time
    }

    pub fn total_distance_nm(&self) -> f64 {
        self.leg_ends[self.leg_ends.len() - 1]
    }

    /// "KATL → KDEN" style label for logs, briefings and map titles.
    pub fn label(&self) -> String {
        format!("{} → {}", self.origin().label(), self.destination().label())
    }

    /// Time over the point `distance_nm` along the route.
    fn eta_at(&self, distance_nm: f64) -> Result<DateTime<Utc>, InvalidRouteError> {
        let millis = distance_nm / self.groundspeed_kt * 3_600_000.0;
        Duration::try_milliseconds(millis.round() as i64)
            .and_then(|elapsed| self.departure_time.checked_add_signed(elapsed))
            .ok_or_else(|| {
                InvalidRouteError::parameter(
                    "departure_time",
                    "arrival time is outside the supported date range",
                )
            })
    }

    /// Position and altitude at `distance_nm` along the route.
    fn position_at(&self, distance_nm: f64) -> (f64, f64, f64) {
        let distance_nm = distance_nm.clamp(0.0, self.total_distance_nm());
        // First leg whose end is at or beyond the requested distance.
        let leg = self
            .leg_ends
            .iter()
            .skip(1)
            .position(|&end| end >= distance_nm)
            .unwrap_or(self.leg_ends.len() - 2);

        let start = &self.waypoints[leg];
        let end = &self.waypoints[leg + 1];
        let leg_len = self.leg_ends[leg + 1] - self.leg_ends[leg];
        let fraction = ((distance_nm - self.leg_ends[leg]) / leg_len).clamp(0.0, 1.0);

        let (lat, lon) = intermediate_point(
            start.latitude,
            start.longitude,
            end.latitude,
            end.longitude,
            fraction,
        );
        let alt_start = start.altitude_ft.unwrap_or(self.cruise_altitude_ft);
        let alt_end = end.altitude_ft.unwrap_or(self.cruise_altitude_ft);
        (lat, lon, alt_start + (alt_end - alt_start) * fraction)
    }
}

fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Number of evenly spaced samples (endpoints included) for a route of
/// `total_nm` sampled roughly every `interval_nm`.
///
/// A 500 NM route sampled every 100 NM yields 5 points; never fewer than 2.
pub fn sample_count(total_nm: f64, interval_nm: f64) -> usize {
    let raw = (total_nm / interval_nm - SAMPLE_COUNT_EPSILON).ceil();
    if raw.is_finite() && raw > 2.0 {
        raw as usize
    } else {
        2
    }
}

/// Sample the route at evenly spaced distances and attach ETAs.
///
/// The returned points are ordered by distance and therefore by ETA; the first
/// is the departure point and the last the destination.
pub fn build_sample_points(
    route: &Route,
    interval_nm: f64,
) -> Result<Vec<SamplePoint>, InvalidRouteError> {
    if !interval_nm.is_finite() || interval_nm <= 0.0 {
        return Err(InvalidRouteError::parameter(
            "sample_interval_nm",
            "must be a positive number",
        ));
    }

    let total = route.total_distance_nm();
    let n = sample_count(total, interval_nm);
    let step = total / (n - 1) as f64;

    let points = (0..n)
        .map(|index| {
            let distance_nm = if index == n - 1 {
                total
            } else {
                step * index as f64
            };
            let (latitude, longitude, altitude_ft) = route.position_at(distance_nm);
            Ok(SamplePoint {
                index,
                latitude,
                longitude,
                altitude_ft,
                distance_nm,
                eta: route.eta_at(distance_nm)?,
            })
        })
        .collect::<Result<Vec<_>, InvalidRouteError>>()?;

    tracing::debug!(
        "Sampled route {} ({:.1} NM) into {} points every {:.1} NM",
        route.label(),
        total,
        points.len(),
        step
    );

    Ok(points)
}

/// Great-circle distance between two points in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_NM * a.sqrt().min(1.0).asin()
}

/// Point at `fraction` (0..=1) of the way along the great circle from 1 to 2.
pub fn intermediate_point(lat1: f64, lon1: f64, lat2: f64, lon2: f64, fraction: f64) -> (f64, f64) {
    let delta = haversine_nm(lat1, lon1, lat2, lon2) / EARTH_RADIUS_NM;
    if delta < 1e-12 {
        return (lat1, lon1);
    }

    let (phi1, lambda1) = (lat1.to_radians(), lon1.to_radians());
    let (phi2, lambda2) = (lat2.to_radians(), lon2.to_radians());

    let a = ((1.0 - fraction) * delta).sin() / delta.sin();
    let b = (fraction * delta).sin() / delta.sin();

    let x = a * phi1.cos() * lambda1.cos() + b * phi2.cos() * lambda2.cos();
    let y = a * phi1.cos() * lambda1.sin() + b * phi2.cos() * lambda2.sin();
    let z = a * phi1.sin() + b * phi2.sin();

    let phi = z.atan2((x * x + y * y).sqrt());
    let lambda = y.atan2(x);
    (phi.to_degrees(), lambda.to_degrees())
}

/// Latitude/longitude boxes covering `half_width_nm` around a point, each as
/// `(lat_min, lon_min, lat_max, lon_max)`.
///
/// A box that would cross the antimeridian is split into one box per side,
/// so there are one or two boxes.
pub fn bbox_around(
    latitude: f64,
    longitude: f64,
    half_width_nm: f64,
) -> Vec<(f64, f64, f64, f64)> {
    let d_lat = half_width_nm / 60.0;
    // Longitude degrees shrink towards the poles; cap the widening near them.
    let cos_lat = latitude.to_radians().cos().max(0.1);
    let d_lon = half_width_nm / (60.0 * cos_lat);
    let lat_min = (latitude - d_lat).max(-90.0);
    let lat_max = (latitude + d_lat).min(90.0);

    if d_lon >= 180.0 {
        return vec![(lat_min, -180.0, lat_max, 180.0)];
    }
    let lon_min = longitude - d_lon;
    let lon_max = longitude + d_lon;
    if lon_min < -180.0 {
        vec![
            (lat_min, lon_min + 360.0, lat_max, 180.0),
            (lat_min, -180.0, lat_max, lon_max),
        ]
    } else if lon_max > 180.0 {
        vec![
            (lat_min, lon_min, lat_max, 180.0),
            (lat_min, -180.0, lat_max, lon_max - 360.0),
        ]
    } else {
        vec![(lat_min, lon_min, lat_max, lon_max)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn departure() -> DateTime<Utc> {
        "2026-03-01T08:00:00Z".parse().unwrap()
    }

    fn katl_kden() -> Route {
        Route::new(
            vec![
                Waypoint::new(33.6367, -84.4281).named("KATL"),
                Waypoint::new(39.8617, -104.6731).named("KDEN"),
            ],
            34_000.0,
            departure(),
            450.0,
        )
        .unwrap()
    }

    #[test]
    fn test_haversine_one_degree_of_latitude() {
        let d = haversine_nm(0.0, 0.0, 1.0, 0.0);
        assert!((d - 60.04).abs() < 0.05, "got {}", d);
    }

    #[test]
    fn test_haversine_katl_kden() {
        let route = katl_kden();
        // Published great-circle distance is about 1040 NM.
        assert!((route.total_distance_nm() - 1040.0).abs() < 5.0);
    }

    #[test]
    fn test_sample_count_scenario_500_by_100() {
        assert_eq!(sample_count(500.0, 100.0), 5);
    }

    #[test]
    fn test_sample_count_short_route_keeps_endpoints() {
        assert_eq!(sample_count(10.0, 100.0), 2);
        assert_eq!(sample_count(0.5, 25.0), 2);
    }

    #[test]
    fn test_two_waypoints_sampled_into_five() {
        let a = Waypoint::new(0.0, 0.0);
        let b = Waypoint::new(0.0, 8.0);
        let total = haversine_nm(0.0, 0.0, 0.0, 8.0);
        let route = Route::new(vec![a, b], 30_000.0, departure(), 400.0).unwrap();

        let points = build_sample_points(&route, total / 5.0).unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].distance_nm, 0.0);
        assert!((points[4].distance_nm - total).abs() < 1e-9);
        assert!((points[4].longitude - 8.0).abs() < 1e-6);
        assert!((points[2].longitude - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_samples_are_time_ordered_and_indexed() {
        let route = katl_kden();
        let points = build_sample_points(&route, 25.0).unwrap();
        assert!(points.len() > 2);
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.index, i);
        }
        for pair in points.windows(2) {
            assert!(pair[0].eta < pair[1].eta);
            assert!(pair[0].distance_nm < pair[1].distance_nm);
        }
        assert_eq!(points[0].eta, departure());
    }

    #[test]
    fn test_eta_follows_groundspeed() {
        let route = Route::new(
            vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 10.0)],
            30_000.0,
            departure(),
            300.0,
        )
        .unwrap();
        let points = build_sample_points(&route, 100.0).unwrap();
        let last = points.last().unwrap();
        let expected_secs = (route.total_distance_nm() / 300.0 * 3600.0) as i64;
        assert!(((last.eta - departure()).num_seconds() - expected_secs).abs() <= 1);
    }

    #[test]
    fn test_multi_leg_route_passes_through_waypoint() {
        let route = Route::new(
            vec![
                Waypoint::new(0.0, 0.0),
                Waypoint::new(0.0, 5.0),
                Waypoint::new(5.0, 5.0),
            ],
            30_000.0,
            departure(),
            450.0,
        )
        .unwrap();
        let leg = haversine_nm(0.0, 0.0, 0.0, 5.0);
        // Two equal legs sampled at a third of the length: start, corner, end.
        let points = build_sample_points(&route, 2.0 * leg / 3.0).unwrap();
        assert_eq!(points.len(), 3);
        assert!((points[1].latitude).abs() < 1e-6);
        assert!((points[1].longitude - 5.0).abs() < 1e-6);
        assert!((points[2].latitude - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_altitude_interpolates_between_waypoints() {
        let route = Route::new(
            vec![
                Waypoint::new(0.0, 0.0).at_altitude(0.0),
                Waypoint::new(0.0, 4.0),
            ],
            30_000.0,
            departure(),
            450.0,
        )
        .unwrap();
        let total = route.total_distance_nm();
        let points = build_sample_points(&route, total / 2.0).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].altitude_ft, 0.0);
        assert_eq!(points[1].altitude_ft, 30_000.0);
    }

    #[test]
    fn test_rejects_single_point() {
        let err = Route::new(vec![Waypoint::new(1.0, 1.0)], 0.0, departure(), 450.0).unwrap_err();
        assert_eq!(err, InvalidRouteError::TooFewPoints(1));
    }

    #[test]
    fn test_rejects_duplicate_consecutive_points() {
        let err = Route::new(
            vec![Waypoint::new(10.0, 10.0), Waypoint::new(10.0, 10.0)],
            0.0,
            departure(),
            450.0,
        )
        .unwrap_err();
        assert_eq!(err, InvalidRouteError::DuplicatePoint { index: 1 });
    }

    #[test]
    fn test_rejects_out_of_range_latitude() {
        let err = Route::new(
            vec![Waypoint::new(91.0, 0.0), Waypoint::new(10.0, 10.0)],
            0.0,
            departure(),
            450.0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            InvalidRouteError::CoordinateOutOfRange { index: 0, .. }
        ));
    }

    #[test]
    fn test_rejects_nan_longitude() {
        let err = Route::new(
            vec![Waypoint::new(10.0, 10.0), Waypoint::new(10.0, f64::NAN)],
            0.0,
            departure(),
            450.0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            InvalidRouteError::CoordinateOutOfRange { index: 1, .. }
        ));
    }

    #[test]
    fn test_rejects_antipodal_leg() {
        let err = Route::new(
            vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 180.0)],
            0.0,
            departure(),
            450.0,
        )
        .unwrap_err();
        assert_eq!(err, InvalidRouteError::AntipodalLeg { index: 1 });
    }

    #[test]
    fn test_rejects_zero_groundspeed() {
        let err = Route::new(
            vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 1.0)],
            0.0,
            departure(),
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, InvalidRouteError::InvalidParameter { .. }));
    }

    #[test]
    fn test_rejects_implausible_groundspeed() {
        for groundspeed in [1e-12, 0.5, 2500.0, f64::INFINITY, f64::NAN] {
            let err = Route::new(
                vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 10.0)],
                30_000.0,
                departure(),
                groundspeed,
            )
            .unwrap_err();
            assert!(
                matches!(err, InvalidRouteError::InvalidParameter { ref field, .. } if field == "groundspeed_kt"),
                "{}",
                groundspeed
            );
        }
    }

    #[test]
    fn test_arrival_past_the_calendar_is_an_error() {
        let route = Route::new(
            vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 10.0)],
            30_000.0,
            DateTime::<Utc>::MAX_UTC - Duration::minutes(30),
            MIN_GROUNDSPEED_KT,
        )
        .unwrap();
        let err = build_sample_points(&route, 100.0).unwrap_err();
        assert!(matches!(
            err,
            InvalidRouteError::InvalidParameter { ref field, .. } if field == "departure_time"
        ));
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        let route = katl_kden();
        assert!(build_sample_points(&route, 0.0).is_err());
        assert!(build_sample_points(&route, f64::NAN).is_err());
    }

    #[test]
    fn test_intermediate_point_endpoints() {
        let (lat, lon) = intermediate_point(10.0, 20.0, 30.0, 40.0, 0.0);
        assert!((lat - 10.0).abs() < 1e-9 && (lon - 20.0).abs() < 1e-9);
        let (lat, lon) = intermediate_point(10.0, 20.0, 30.0, 40.0, 1.0);
        assert!((lat - 30.0).abs() < 1e-9 && (lon - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_route_label_uses_names() {
        assert_eq!(katl_kden().label(), "KATL → KDEN");
    }

    #[test]
    fn test_bbox_around_equator() {
        let boxes = bbox_around(0.0, 0.0, 60.0);
        assert_eq!(boxes.len(), 1);
        let (lat0, lon0, lat1, lon1) = boxes[0];
        assert!((lat0 + 1.0).abs() < 1e-9);
        assert!((lat1 - 1.0).abs() < 1e-9);
        assert!((lon0 + 1.0).abs() < 1e-9);
        assert!((lon1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bbox_around_clamps_at_pole() {
        let boxes = bbox_around(89.9, 0.0, 60.0);
        assert_eq!(boxes.len(), 1);
        let (_, lon0, lat1, lon1) = boxes[0];
        assert_eq!(lat1, 90.0);
        assert!((lon0 + 10.0).abs() < 1e-9 && (lon1 - 10.0).abs() < 1e-9);

        // Wide enough to wrap the whole parallel
        let boxes = bbox_around(60.0, 0.0, 6000.0);
        assert_eq!(boxes.len(), 1);
        assert_eq!((boxes[0].1, boxes[0].3), (-180.0, 180.0));
    }

    #[test]
    fn test_bbox_around_splits_at_antimeridian() {
        let east = bbox_around(0.0, 179.5, 60.0);
        assert_eq!(east.len(), 2);
        let (_, lon0, _, lon1) = east[0];
        assert!((lon0 - 178.5).abs() < 1e-9);
        assert_eq!(lon1, 180.0);
        let (_, lon0, _, lon1) = east[1];
        assert_eq!(lon0, -180.0);
        assert!((lon1 + 179.5).abs() < 1e-9);

        let west = bbox_around(0.0, -179.5, 60.0);
        assert_eq!(west.len(), 2);
        assert!((west[0].1 - 179.5).abs() < 1e-9);
        assert_eq!(west[0].3, 180.0);
        assert_eq!(west[1].1, -180.0);
        assert!((west[1].3 + 178.5).abs() < 1e-9);

        for (lat0, lon0, lat1, lon1) in east.into_iter().chain(west) {
            assert!(lat0 < lat1 && lon0 < lon1);
            assert!((-180.0..=180.0).contains(&lon0) && (-180.0..=180.0).contains(&lon1));
        }
    }
}
