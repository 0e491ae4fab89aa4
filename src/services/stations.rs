//! aviationweather.gov airport conditions.
//!
//! Latest METAR and TAF for the airports at either end of the route. They are
//! shown on the map with a flight-category colour, returned in the summary,
//! and a METAR taken inside an endpoint's forecast window supplies that sample
//! point's surface visibility.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{SamplePoint, TimeWindow, WeatherObservation};
use crate::services::awc::parse_obs_time;
use crate::services::cache::TtlCache;
use crate::services::corridor::haversine_nm;
use crate::services::provider::ProviderError;

/// Source name on observations built from a METAR.
pub const METAR_SOURCE: &str = "metar";

const SOURCE: &str = "aviationweather.gov";

/// Hours of METAR history requested; the newest report per station is kept.
const METAR_HOURS: &str = "3";

/// A METAR further than this from a sample point does not describe it.
const STATION_RADIUS_NM: f64 = 10.0;

const KM_PER_STATUTE_MILE: f64 = 1.609_344;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
}

impl FlightCategory {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "VFR" => Some(FlightCategory::Vfr),
            "MVFR" => Some(FlightCategory::Mvfr),
            "IFR" => Some(FlightCategory::Ifr),
            "LIFR" => Some(FlightCategory::Lifr),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlightCategory::Vfr => "VFR",
            FlightCategory::Mvfr => "MVFR",
            FlightCategory::Ifr => "IFR",
            FlightCategory::Lifr => "LIFR",
        }
    }

    /// Conventional chart colour for the category.
    pub fn color(&self) -> &'static str {
        match self {
            FlightCategory::Vfr => "#2e7d32",
            FlightCategory::Mvfr => "#1565c0",
            FlightCategory::Ifr => "#c62828",
            FlightCategory::Lifr => "#8e24aa",
        }
    }
}

/// Colour for a station without a reported category.
pub const UNKNOWN_CATEGORY_COLOR: &str = "#757575";

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Metar {
    pub raw: String,
    pub flight_category: Option<FlightCategory>,
    pub observed_at: Option<DateTime<Utc>>,
    pub visibility_km: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Taf {
    pub raw: String,
    pub issued_at: Option<DateTime<Utc>>,
}

/// What the airport is reporting and forecasting.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StationWeather {
    pub icao: String,
    pub metar: Option<Metar>,
    pub taf: Option<Taf>,
}

impl StationWeather {
    pub fn flight_category(&self) -> Option<FlightCategory> {
        self.metar.as_ref().and_then(|m| m.flight_category)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AirportConditions {
    pub stations: Vec<StationWeather>,
    /// "metar" and/or "taf" when that request failed
    pub missing_products: Vec<String>,
}

impl AirportConditions {
    pub fn station(&self, icao: &str) -> Option<&StationWeather> {
        self.stations.iter().find(|s| s.icao == icao)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetarRow {
    icao_id: Option<String>,
    raw_ob: Option<String>,
    #[serde(alias = "flightCat")]
    flt_cat: Option<String>,
    obs_time: Option<serde_json::Value>,
    /// Statute miles; a number or a string such as "10+"
    visib: Option<serde_json::Value>,
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TafRow {
    icao_id: Option<String>,
    #[serde(rename = "rawTAF")]
    raw_taf: Option<String>,
    issue_time: Option<serde_json::Value>,
}

pub struct StationWeatherClient {
    client: reqwest::Client,
    base_url: String,
    metars: TtlCache<String, Arc<Vec<(String, Metar)>>>,
    tafs: TtlCache<String, Arc<Vec<(String, Taf)>>>,
}

impl StationWeatherClient {
    pub fn new(base_url: &str, http_timeout: Duration, cache_ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            metars: TtlCache::new(cache_ttl),
            tafs: TtlCache::new(cache_ttl),
        }
    }

    /// Latest METAR and TAF for each of `icaos`. A failed product is logged
    /// and listed in `missing_products`; it never fails the whole lookup.
    pub async fn conditions(&self, icaos: &[String]) -> AirportConditions {
        let mut ids: Vec<String> = Vec::new();
        for code in icaos {
            let code = code.trim().to_uppercase();
            if !code.is_empty() && !ids.contains(&code) {
                ids.push(code);
            }
        }
        if ids.is_empty() {
            return AirportConditions::default();
        }
        let ids_param = ids.join(",");

        let (metars, tafs) = tokio::join!(self.metars(&ids_param), self.tafs(&ids_param));

        let mut missing_products = Vec::new();
        let metars = metars.unwrap_or_else(|e| {
            tracing::warn!("METAR lookup for {} failed: {}", ids_param, e);
            missing_products.push("metar".to_string());
            Arc::new(Vec::new())
        });
        let tafs = tafs.unwrap_or_else(|e| {
            tracing::warn!("TAF lookup for {} failed: {}", ids_param, e);
            missing_products.push("taf".to_string());
            Arc::new(Vec::new())
        });

        let stations = ids
            .into_iter()
            .map(|icao| {
                let metar = metars
                    .iter()
                    .filter(|(id, _)| *id == icao)
                    .map(|(_, m)| m)
                    .max_by_key(|m| m.observed_at)
                    .cloned();
                let taf = tafs
                    .iter()
                    .filter(|(id, _)| *id == icao)
                    .map(|(_, t)| t)
                    .max_by_key(|t| t.issued_at)
                    .cloned();
                StationWeather { icao, metar, taf }
            })
            .collect();

        AirportConditions {
            stations,
            missing_products,
        }
    }

    async fn metars(&self, ids: &str) -> Result<Arc<Vec<(String, Metar)>>, ProviderError> {
        if let Some(hit) = self.metars.get(&ids.to_string()).await {
            return Ok(hit);
        }
        let url = format!("{}/metar", self.base_url);
        let rows: Vec<MetarRow> = self
            .get_json(&url, &[("ids", ids), ("format", "json"), ("hours", METAR_HOURS)])
            .await?;
        tracing::debug!("aviationweather.gov returned {} METARs for {}", rows.len(), ids);

        let parsed = Arc::new(rows.into_iter().filter_map(parse_metar).collect::<Vec<_>>());
        self.metars.insert(ids.to_string(), parsed.clone()).await;
        Ok(parsed)
    }

    async fn tafs(&self, ids: &str) -> Result<Arc<Vec<(String, Taf)>>, ProviderError> {
        if let Some(hit) = self.tafs.get(&ids.to_string()).await {
            return Ok(hit);
        }
        let url = format!("{}/taf", self.base_url);
        let rows: Vec<TafRow> = self
            .get_json(&url, &[("ids", ids), ("format", "json")])
            .await?;
        tracing::debug!("aviationweather.gov returned {} TAFs for {}", rows.len(), ids);

        let parsed = Arc::new(rows.into_iter().filter_map(parse_taf).collect::<Vec<_>>());
        self.tafs.insert(ids.to_string(), parsed.clone()).await;
        Ok(parsed)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ProviderError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(SOURCE, &e))?;

        // 204 when none of the stations has a report
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(ProviderError::from_status(SOURCE, response.status()));
        }
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| ProviderError::from_reqwest(SOURCE, &e))
    }
}

fn parse_metar(row: MetarRow) -> Option<(String, Metar)> {
    let icao = row.icao_id?.trim().to_uppercase();
    let raw = row.raw_ob?;
    Some((
        icao,
        Metar {
            raw,
            flight_category: row.flt_cat.as_deref().and_then(FlightCategory::from_code),
            observed_at: row.obs_time.as_ref().and_then(parse_obs_time),
            visibility_km: row
                .visib
                .as_ref()
                .and_then(parse_visibility_sm)
                .map(|sm| crate::helpers::round_to(sm * KM_PER_STATUTE_MILE, 2)),
            latitude: row.lat,
            longitude: row.lon,
        },
    ))
}

fn parse_taf(row: TafRow) -> Option<(String, Taf)> {
    let icao = row.icao_id?.trim().to_uppercase();
    let raw = row.raw_taf?;
    Some((
        icao,
        Taf {
            raw,
            issued_at: row.issue_time.as_ref().and_then(parse_obs_time),
        },
    ))
}

/// Statute miles from `visib`: 6, "6", "10+", "1/2" or "1 1/2".
fn parse_visibility_sm(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let s = s.trim().trim_end_matches('+').trim_start_matches('P');
            s.split_whitespace()
                .map(|part| match part.split_once('/') {
                    Some((num, den)) => {
                        let num: f64 = num.parse().ok()?;
                        let den: f64 = den.parse().ok()?;
                        (den != 0.0).then(|| num / den)
                    }
                    None => part.parse::<f64>().ok(),
                })
                .try_fold(0.0, |acc, v| v.map(|v| acc + v))
                .filter(|_| !s.is_empty())
        }
        _ => None,
    }
}

impl Metar {
    /// The report as an observation for `point`, when it was taken inside
    /// `window` and close enough to the point to describe it.
    ///
    /// Only visibility is carried over; the rest of a METAR describes the
    /// surface, not the flight level.
    pub fn to_observation(
        &self,
        point: &SamplePoint,
        window: TimeWindow,
    ) -> Option<WeatherObservation> {
        let observed = self.observed_at.filter(|t| window.contains(*t))?;
        let visibility = self.visibility_km?;
        if let (Some(lat), Some(lon)) = (self.latitude, self.longitude) {
            if haversine_nm(lat, lon, point.latitude, point.longitude) > STATION_RADIUS_NM {
                return None;
            }
        }
        let mut obs = WeatherObservation::empty(point.index, observed, METAR_SOURCE);
        obs.issued_at = Some(observed);
        obs.visibility_km = Some(visibility);
        Some(obs)
    }
}
