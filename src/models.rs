//! Core data types shared by the corridor, provider, aggregation, briefing
//! and map stages.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// A position along the route with its estimated time of arrival.
///
/// Built once by the corridor builder and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SamplePoint {
    /// Position in the corridor, 0 = departure
    pub index: usize,
    /// Latitude (WGS84)
    pub latitude: f64,
    /// Longitude (WGS84)
    pub longitude: f64,
    /// Planned altitude in feet
    pub altitude_ft: f64,
    /// Cumulative distance from departure in nautical miles
    pub distance_nm: f64,
    /// Estimated time over this point
    pub eta: DateTime<Utc>,
}

/// The span of forecast times considered relevant for a sample point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `half_width` either side of `centre`, saturating at the
    /// ends of the representable calendar.
    pub fn around(centre: DateTime<Utc>, half_width: Duration) -> Self {
        Self {
            start: centre
                .checked_sub_signed(half_width)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: centre
                .checked_add_signed(half_width)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }

    pub fn centre(&self) -> DateTime<Utc> {
        self.start + (self.end - self.start) / 2
    }
}

/// Wind as meteorologists report it: the direction it blows *from*.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct WindVector {
    /// Direction the wind comes from, degrees true (0 = north)
    pub direction_deg: f64,
    /// Speed in knots
    pub speed_kt: f64,
}

impl WindVector {
    /// Eastward and northward components of the air motion, in knots.
    pub fn components(&self) -> (f64, f64) {
        let rad = self.direction_deg.to_radians();
        (-self.speed_kt * rad.sin(), -self.speed_kt * rad.cos())
    }

    pub fn from_components(u: f64, v: f64) -> Self {
        let speed_kt = (u * u + v * v).sqrt();
        if speed_kt < 1e-9 {
            return Self {
                direction_deg: 0.0,
                speed_kt: 0.0,
            };
        }
        let direction_deg = ((-u).atan2(-v).to_degrees() + 360.0) % 360.0;
        Self {
            direction_deg,
            speed_kt,
        }
    }
}

/// One provider's view of the weather at a sample point for one forecast time.
///
/// Every measurement is optional: a model forecast knows the wind but not what
/// pilots felt, a pilot report knows the ride but rarely the precipitation.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeatherObservation {
    /// Sample point this observation belongs to
    pub point_index: usize,
    /// Time the observation or forecast is valid for
    pub valid_time: DateTime<Utc>,
    /// When the provider produced this data (model run, report time)
    pub issued_at: Option<DateTime<Utc>>,
    /// Provider name, e.g. "yr.no" or "aviationweather.gov"
    pub source: String,
    pub wind: Option<WindVector>,
    /// Gust speed in knots
    pub gust_kt: Option<f64>,
    /// Precipitation rate in mm/h
    pub precipitation_mm_h: Option<f64>,
    /// Turbulence index, 0 (smooth) to 1 (extreme)
    pub turbulence_index: Option<f64>,
    /// Icing risk, 0 (none) to 1 (severe)
    pub icing_risk: Option<f64>,
    /// Visibility in kilometres
    pub visibility_km: Option<f64>,
    /// Air temperature in Celsius
    pub temperature_c: Option<f64>,
}

impl WeatherObservation {
    /// An observation with no measurements, to be filled in by a provider.
    pub fn empty(point_index: usize, valid_time: DateTime<Utc>, source: &str) -> Self {
        Self {
            point_index,
            valid_time,
            issued_at: None,
            source: source.to_string(),
            wind: None,
            gust_kt: None,
            precipitation_mm_h: None,
            turbulence_index: None,
            icing_risk: None,
            visibility_km: None,
            temperature_c: None,
        }
    }

    /// Strongest wind figure available: the gust if reported, else the mean wind.
    pub fn peak_wind_kt(&self) -> Option<f64> {
        let mean = self.wind.map(|w| w.speed_kt);
        match (mean, self.gust_kt) {
            (Some(m), Some(g)) => Some(m.max(g)),
            (m, g) => m.or(g),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// How a profile entry's observation came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntryOrigin {
    /// Exactly one most-recent observation was available
    Single,
    /// Several equally recent observations were averaged
    Averaged,
    /// No observation; copied from the nearest observed neighbour
    Filled,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProfileEntry {
    pub sample: SamplePoint,
    pub observation: WeatherObservation,
    pub confidence: Confidence,
    pub origin: EntryOrigin,
    /// Providers that contributed to this entry, sorted
    pub sources: Vec<String>,
}

/// Time-ordered weather along the corridor, one entry per sample point.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CorridorProfile {
    pub entries: Vec<ProfileEntry>,
    /// Points that had at least one observation of their own
    pub observed_points: usize,
    /// Points filled from a neighbour
    pub filled_points: usize,
    /// Set when the fetch deadline expired before every point was attempted
    pub degraded: bool,
}

impl CorridorProfile {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_low_confidence(&self) -> bool {
        self.degraded || self.entries.iter().any(|e| e.confidence == Confidence::Low)
    }
}

/// Coarse classification of route weather risk, ordered from best to worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Calm,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Calm => "calm",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }
}
