//! yr.no Locationforecast 2.0 provider.
//!
//! Fetches model forecasts from the MET Norway API and derives the aviation
//! fields the briefing needs (turbulence, icing, visibility) from the surface
//! parameters.
//! See: https://api.met.no/weatherapi/locationforecast/2.0/documentation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::helpers::{clamp_unit, ms_to_knots};
use crate::models::{SamplePoint, TimeWindow, WeatherObservation, WindVector};
use crate::services::cache::TtlCache;
use crate::services::provider::{ProviderError, WeatherProvider};

pub const YR_API_URL: &str = "https://api.met.no/weatherapi/locationforecast/2.0/complete";

const SOURCE: &str = "yr.no";

/// Gust spread (gust minus mean wind) that alone saturates the mechanical part
/// of the turbulence index.
const GUST_SPREAD_FULL_KT: f64 = 15.0;
/// Mean wind that alone saturates the wind part of the turbulence index.
const WIND_FULL_KT: f64 = 60.0;
const HEAVY_PRECIP_MM_H: f64 = 4.0;
const MIN_VISIBILITY_KM: f64 = 0.2;
const CLEAR_VISIBILITY_KM: f64 = 10.0;

/// Location key: coordinates at the 4 decimal places yr.no accepts.
type LocationKey = (i64, i64);

/// Forecast provider backed by the yr.no Locationforecast API.
pub struct YrProvider {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    cache: TtlCache<LocationKey, Arc<YrResponse>>,
    max_cache_ttl: Duration,
}

// --- yr.no JSON response types ---

#[derive(Debug, Deserialize)]
struct YrResponse {
    properties: YrProperties,
}

#[derive(Debug, Deserialize)]
struct YrProperties {
    meta: Option<YrMeta>,
    timeseries: Vec<YrTimeseries>,
}

#[derive(Debug, Deserialize)]
struct YrMeta {
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct YrTimeseries {
    time: DateTime<Utc>,
    data: YrData,
}

#[derive(Debug, Deserialize)]
struct YrData {
    instant: YrInstant,
    next_1_hours: Option<YrPeriod>,
    next_6_hours: Option<YrPeriod>,
}

#[derive(Debug, Deserialize)]
struct YrInstant {
    details: YrInstantDetails,
}

#[derive(Debug, Deserialize)]
struct YrInstantDetails {
    air_temperature: Option<f64>,
    wind_speed: Option<f64>,
    wind_from_direction: Option<f64>,
    wind_speed_of_gust: Option<f64>,
    relative_humidity: Option<f64>,
    /// Percent, 0..=100
    fog_area_fraction: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YrPeriod {
    details: Option<YrPeriodDetails>,
}

#[derive(Debug, Deserialize)]
struct YrPeriodDetails {
    precipitation_amount: Option<f64>,
}

impl YrProvider {
    pub fn new(
        base_url: &str,
        user_agent: &str,
        http_timeout: Duration,
        max_cache_ttl: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.to_string(),
            user_agent: user_agent.to_string(),
            cache: TtlCache::new(max_cache_ttl),
            max_cache_ttl,
        }
    }

    /// Timeseries for a location, from the cache when still fresh.
    async fn timeseries(&self, lat: f64, lon: f64) -> Result<Arc<YrResponse>, ProviderError> {
        let key = location_key(lat, lon);
        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!("yr.no cache hit for {:.4},{:.4}", lat, lon);
            return Ok(hit);
        }

        let (response, ttl) = self.fetch_timeseries(lat, lon).await?;
        let response = Arc::new(response);
        self.cache.insert_with_ttl(key, response.clone(), ttl).await;
        tracing::debug!("yr.no cache holds {} locations", self.cache.len().await);
        Ok(response)
    }

    /// Fetch the full timeseries from yr.no for a given location.
    ///
    /// Returns the parsed body and how long it may be cached: the `Expires`
    /// header, capped at the configured maximum.
    async fn fetch_timeseries(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<(YrResponse, Duration), ProviderError> {
        // Limit to 4 decimal places per yr.no terms of service
        let url = format!("{}?lat={:.4}&lon={:.4}", self.base_url, lat, lon);

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| ProviderError::Permanent(format!("Invalid User-Agent: {}", e)))?,
        );

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(SOURCE, &e))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_status(SOURCE, response.status()));
        }

        // Extract caching headers before consuming the body
        let ttl = response
            .headers()
            .get("expires")
            .and_then(|v| v.to_str().ok())
            .map(|s| {
                let remaining = parse_expires_header(s) - Utc::now();
                remaining.to_std().unwrap_or(Duration::ZERO)
            })
            .map_or(self.max_cache_ttl, |t| t.min(self.max_cache_ttl));

        let body: YrResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(SOURCE, &e))?;

        tracing::debug!(
            "yr.no returned {} timeseries entries for {:.4},{:.4} (cache {}s)",
            body.properties.timeseries.len(),
            lat,
            lon,
            ttl.as_secs()
        );

        Ok((body, ttl))
    }
}

#[async_trait]
impl WeatherProvider for YrProvider {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn fetch(
        &self,
        point: &SamplePoint,
        window: TimeWindow,
    ) -> Result<Vec<WeatherObservation>, ProviderError> {
        let response = self.timeseries(point.latitude, point.longitude).await?;
        let issued_at = response.properties.meta.as_ref().and_then(|m| m.updated_at);

        Ok(
            closest_in_window(&response.properties.timeseries, point.eta, window)
                .map(|entry| to_observation(point.index, entry, issued_at))
                .into_iter()
                .collect(),
        )
    }
}

fn location_key(lat: f64, lon: f64) -> LocationKey {
    ((lat * 10_000.0).round() as i64, (lon * 10_000.0).round() as i64)
}

/// The entry closest to `eta` among those inside `window`. Earlier wins a tie.
fn closest_in_window(
    timeseries: &[YrTimeseries],
    eta: DateTime<Utc>,
    window: TimeWindow,
) -> Option<&YrTimeseries> {
    let target_ts = eta.timestamp();
    timeseries
        .iter()
        .filter(|ts| window.contains(ts.time))
        .min_by_key(|ts| (ts.time.timestamp() - target_ts).unsigned_abs())
}

/// Map one Locationforecast timeseries entry to an observation.
///
/// Locationforecast describes the surface (10 m wind, 2 m temperature), so
/// every derived field is a surface proxy for the sample point, not a
/// measurement at its flight level.
fn to_observation(
    point_index: usize,
    entry: &YrTimeseries,
    issued_at: Option<DateTime<Utc>>,
) -> WeatherObservation {
    let instant = &entry.data.instant.details;

    // Hourly amount when available, else the 6-hour amount spread evenly.
    let precipitation_mm_h = entry
        .data
        .next_1_hours
        .as_ref()
        .and_then(|p| p.details.as_ref())
        .and_then(|d| d.precipitation_amount)
        .or_else(|| {
            entry
                .data
                .next_6_hours
                .as_ref()
                .and_then(|p| p.details.as_ref())
                .and_then(|d| d.precipitation_amount)
                .map(|mm| mm / 6.0)
        });

    let wind_kt = instant.wind_speed.map(ms_to_knots);
    let gust_kt = instant.wind_speed_of_gust.map(ms_to_knots);

    let mut obs = WeatherObservation::empty(point_index, entry.time, SOURCE);
    obs.issued_at = issued_at;
    obs.wind = wind_kt.map(|speed_kt| WindVector {
        direction_deg: instant.wind_from_direction.unwrap_or(0.0),
        speed_kt,
    });
    obs.gust_kt = gust_kt;
    obs.precipitation_mm_h = precipitation_mm_h;
    obs.turbulence_index = wind_kt.map(|w| turbulence_index(w, gust_kt));
    obs.icing_risk = instant
        .air_temperature
        .map(|t| icing_risk(t, instant.relative_humidity, precipitation_mm_h));
    obs.visibility_km = instant
        .fog_area_fraction
        .map(|fog| visibility_km(fog, precipitation_mm_h));
    obs.temperature_c = instant.air_temperature;
    obs
}

/// Turbulence index from mean wind and gusts, 0..=1.
pub(crate) fn turbulence_index(wind_kt: f64, gust_kt: Option<f64>) -> f64 {
    let spread = gust_kt.map_or(0.0, |g| (g - wind_kt).max(0.0));
    clamp_unit(0.6 * spread / GUST_SPREAD_FULL_KT + 0.4 * wind_kt / WIND_FULL_KT)
}

/// Airframe icing risk, 0..=1. Only supercooled conditions score.
pub(crate) fn icing_risk(
    temperature_c: f64,
    humidity_pct: Option<f64>,
    precipitation_mm_h: Option<f64>,
) -> f64 {
    if !(-20.0..=2.0).contains(&temperature_c) {
        return 0.0;
    }
    let mut risk = 0.2;
    if humidity_pct.is_some_and(|h| h >= 85.0) {
        risk += 0.3;
    }
    if precipitation_mm_h.is_some_and(|p| p > 0.0) {
        risk += 0.3;
    }
    if (-10.0..=0.0).contains(&temperature_c) {
        risk += 0.2;
    }
    clamp_unit(risk)
}

/// Visibility estimate in km from fog cover (percent) and precipitation.
pub(crate) fn visibility_km(fog_pct: f64, precipitation_mm_h: Option<f64>) -> f64 {
    let fog = (fog_pct / 100.0).clamp(0.0, 1.0);
    let mut vis = (CLEAR_VISIBILITY_KM * (1.0 - fog)).max(MIN_VISIBILITY_KM);
    if precipitation_mm_h.is_some_and(|p| p >= HEAVY_PRECIP_MM_H) {
        vis = vis.min(3.0);
    }
    vis
}

/// Parse an HTTP date string (e.g. "Sat, 14 Feb 2026 12:00:00 GMT") into a
/// `DateTime<Utc>`. Falls back to `Utc::now()` (no caching) if parsing fails.
pub fn parse_expires_header(expires: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc2822(expires)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| httpdate_parse(expires))
        .unwrap_or_else(|_| {
            tracing::warn!("Failed to parse Expires header '{}', not caching", expires);
            Utc::now()
        })
}

/// Parse HTTP-date format used by Expires header.
fn httpdate_parse(s: &str) -> Result<DateTime<Utc>, String> {
    // Common HTTP date formats:
    // "Sun, 06 Nov 1994 08:49:37 GMT"     (preferred)
    // "Sunday, 06-Nov-94 08:49:37 GMT"     (obsolete RFC 850)
    // "Sun Nov  6 08:49:37 1994"           (ANSI C asctime)
    let formats = [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ];

    for fmt in &formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    Err(format!("Could not parse HTTP date: {}", s))
}
