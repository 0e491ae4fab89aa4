//! aviationweather.gov pilot report (PIREP) provider.
//!
//! PIREPs are what crews actually felt aloft. Reports inside the corridor box
//! around a sample point and near its altitude are folded into one observation
//! carrying the worst reported turbulence and icing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Deserialize;

use crate::helpers::flight_level_to_feet;
use crate::models::{SamplePoint, TimeWindow, WeatherObservation};
use crate::services::cache::TtlCache;
use crate::services::corridor::bbox_around;
use crate::services::provider::{ProviderError, WeatherProvider};

/// Base of the aviationweather.gov data API; each product is a path below it.
pub const AWC_API_URL: &str = "https://aviationweather.gov/api/data";

const SOURCE: &str = "aviationweather.gov";

/// Reports further than this from the sample altitude are ignored.
const ALTITUDE_BAND_FT: f64 = 4000.0;

/// One row of the `format=json` PIREP response. Only the fields used here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PirepRow {
    /// Epoch seconds, or an ISO timestamp on some mirrors
    obs_time: Option<serde_json::Value>,
    lat: Option<f64>,
    lon: Option<f64>,
    /// Flight level; number, "350", "FL350" or "UNKN"
    flt_lvl: Option<serde_json::Value>,
    tb_int1: Option<String>,
    tb_int2: Option<String>,
    icg_int1: Option<String>,
    icg_int2: Option<String>,
    temp: Option<f64>,
}

pub struct AwcPirepProvider {
    client: reqwest::Client,
    base_url: String,
    corridor_half_width_nm: f64,
    age_hours: f64,
    cache: TtlCache<String, Arc<Vec<PirepRow>>>,
}

impl AwcPirepProvider {
    pub fn new(
        base_url: &str,
        http_timeout: Duration,
        cache_ttl: Duration,
        corridor_half_width_nm: f64,
        age_hours: f64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: format!("{}/pirep", base_url.trim_end_matches('/')),
            corridor_half_width_nm,
            age_hours,
            cache: TtlCache::new(cache_ttl),
        }
    }

    async fn reports_in_box(&self, bbox: String) -> Result<Arc<Vec<PirepRow>>, ProviderError> {
        let key = format!("{}:{}", self.age_hours, bbox);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let age = self.age_hours.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("bbox", bbox.as_str()), ("format", "json"), ("age", age.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(SOURCE, &e))?;

        // AWC answers 204 when the box holds no reports.
        let rows = if response.status() == reqwest::StatusCode::NO_CONTENT {
            Vec::new()
        } else if response.status().is_success() {
            response
                .json::<Vec<PirepRow>>()
                .await
                .map_err(|e| ProviderError::from_reqwest(SOURCE, &e))?
        } else {
            return Err(ProviderError::from_status(SOURCE, response.status()));
        };

        tracing::debug!("aviationweather.gov returned {} PIREPs for {}", rows.len(), bbox);

        let rows = Arc::new(rows);
        self.cache.insert(key, rows.clone()).await;
        Ok(rows)
    }
}

#[async_trait]
impl WeatherProvider for AwcPirepProvider {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn fetch(
        &self,
        point: &SamplePoint,
        _window: TimeWindow,
    ) -> Result<Vec<WeatherObservation>, ProviderError> {
        // Two boxes when the corridor crosses the antimeridian
        let boxes = bbox_around(point.latitude, point.longitude, self.corridor_half_width_nm);
        let found = try_join_all(boxes.into_iter().map(|(lat_min, lon_min, lat_max, lon_max)| {
            self.reports_in_box(format!(
                "{:.3},{:.3},{:.3},{:.3}",
                lat_min, lon_min, lat_max, lon_max
            ))
        }))
        .await?;

        let rows: Vec<PirepRow> = found.iter().flat_map(|rows| rows.iter().cloned()).collect();
        Ok(summarise(point, &rows).into_iter().collect())
    }
}

/// Fold the reports relevant to `point` into a single observation.
fn summarise(point: &SamplePoint, rows: &[PirepRow]) -> Option<WeatherObservation> {
    let mut latest: Option<DateTime<Utc>> = None;
    let mut turbulence: Option<f64> = None;
    let mut icing: Option<f64> = None;
    let mut temperature: Option<f64> = None;

    for row in rows {
        if row.lat.is_none() || row.lon.is_none() {
            continue;
        }
        if let Some(fl) = row.flt_lvl.as_ref().and_then(parse_flight_level) {
            if (flight_level_to_feet(fl) - point.altitude_ft).abs() > ALTITUDE_BAND_FT {
                continue;
            }
        }
        let Some(observed) = row.obs_time.as_ref().and_then(parse_obs_time) else {
            continue;
        };

        let tb = max_intensity(&[&row.tb_int1, &row.tb_int2]);
        let icg = max_intensity(&[&row.icg_int1, &row.icg_int2]);
        if tb.is_none() && icg.is_none() {
            continue;
        }

        turbulence = max_opt(turbulence, tb);
        icing = max_opt(icing, icg);
        if latest.map_or(true, |t| observed > t) {
            latest = Some(observed);
            temperature = row.temp.or(temperature);
        }
    }

    let observed = latest?;
    let mut obs = WeatherObservation::empty(point.index, observed, SOURCE);
    obs.issued_at = Some(observed);
    obs.turbulence_index = turbulence;
    obs.icing_risk = icing;
    obs.temperature_c = temperature;
    Some(obs)
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

fn max_intensity(values: &[&Option<String>]) -> Option<f64> {
    values
        .iter()
        .filter_map(|v| v.as_deref().and_then(intensity_index))
        .fold(None, |acc, v| max_opt(acc, Some(v)))
}

/// Map a PIREP intensity code to the 0..=1 index scale.
pub(crate) fn intensity_index(code: &str) -> Option<f64> {
    let code = code.trim().to_ascii_uppercase();
    let exact = match code.as_str() {
        "NEG" | "SMTH" | "SMOOTH" | "NONE" => Some(0.0),
        "LGT" | "SMTH-LGT" | "TRC" | "TRACE" | "TRC-LGT" => Some(0.25),
        "LGT-MOD" => Some(0.4),
        "MOD" => Some(0.55),
        "MOD-SEV" => Some(0.75),
        "SEV" => Some(0.9),
        "SEV-EXTM" | "EXTM" | "EXTRM" => Some(1.0),
        _ => None,
    };
    exact.or_else(|| {
        if code.contains("EXT") {
            Some(1.0)
        } else if code.contains("SEV") {
            Some(0.9)
        } else if code.contains("MOD") {
            Some(0.55)
        } else if code.contains("LGT") {
            Some(0.25)
        } else {
            None
        }
    })
}

pub(crate) fn parse_flight_level(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s
            .trim()
            .to_ascii_uppercase()
            .trim_start_matches("FL")
            .trim()
            .parse()
            .ok(),
        _ => None,
    }
}

pub(crate) fn parse_obs_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(|s| DateTime::from_timestamp(s, 0)),
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
        _ => None,
    }
}
