//! Scripted in-memory providers and fixtures for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{SamplePoint, TimeWindow, WeatherObservation, WindVector};
use crate::services::provider::{ProviderError, WeatherProvider};

/// Provider whose behaviour is fixed up front.
pub struct ScriptedProvider {
    name: String,
    calls: AtomicUsize,
    /// Calls before this count fail with `error`
    fail_first: usize,
    error: ProviderError,
    delay: Duration,
    /// Only points at or after this index are delayed
    delay_from: usize,
    empty: bool,
    issued_at: Option<DateTime<Utc>>,
    wind_kt: f64,
    turbulence: f64,
}

impl ScriptedProvider {
    pub fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            fail_first: 0,
            error: ProviderError::Transient("scripted".to_string()),
            delay: Duration::ZERO,
            delay_from: 0,
            empty: false,
            issued_at: Some(issued()),
            wind_kt: 20.0,
            turbulence: 0.1,
        }
    }

    /// Always fails with `error`.
    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self::ok(name).fail_first(usize::MAX, error)
    }

    pub fn fail_first(mut self, n: usize, error: ProviderError) -> Self {
        self.fail_first = n;
        self.error = error;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay only the points from `index` onwards.
    pub fn with_delay_from(mut self, index: usize, delay: Duration) -> Self {
        self.delay_from = index;
        self.delay = delay;
        self
    }

    /// Answers successfully with no observations.
    pub fn empty(mut self) -> Self {
        self.empty = true;
        self
    }

    pub fn with_weather(mut self, wind_kt: f64, turbulence: f64) -> Self {
        self.wind_kt = wind_kt;
        self.turbulence = turbulence;
        self
    }

    pub fn issued(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = Some(at);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        point: &SamplePoint,
        _window: TimeWindow,
    ) -> Result<Vec<WeatherObservation>, ProviderError> {
        if !self.delay.is_zero() && point.index >= self.delay_from {
            tokio::time::sleep(self.delay).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(self.error.clone());
        }
        if self.empty {
            return Ok(Vec::new());
        }
        let mut obs = WeatherObservation::empty(point.index, point.eta, &self.name);
        obs.issued_at = self.issued_at;
        obs.wind = Some(WindVector {
            direction_deg: 270.0,
            speed_kt: self.wind_kt,
        });
        obs.turbulence_index = Some(self.turbulence);
        obs.precipitation_mm_h = Some(0.0);
        obs.visibility_km = Some(10.0);
        obs.icing_risk = Some(0.0);
        Ok(vec![obs])
    }
}

pub fn issued() -> DateTime<Utc> {
    "2026-03-01T06:00:00Z".parse().unwrap()
}

pub fn departure() -> DateTime<Utc> {
    "2026-03-01T08:00:00Z".parse().unwrap()
}

/// `n` sample points one hundred miles and a quarter of an hour apart.
pub fn sample_points(n: usize) -> Vec<SamplePoint> {
    (0..n)
        .map(|index| SamplePoint {
            index,
            latitude: 40.0,
            longitude: -100.0 + index as f64 * 2.0,
            altitude_ft: 35_000.0,
            distance_nm: index as f64 * 100.0,
            eta: departure() + chrono::Duration::minutes(15 * index as i64),
        })
        .collect()
}

/// A plain observation for point `index` from `source`.
pub fn observation(index: usize, source: &str, issued_at: Option<DateTime<Utc>>) -> WeatherObservation {
    let mut obs = WeatherObservation::empty(
        index,
        departure() + chrono::Duration::minutes(15 * index as i64),
        source,
    );
    obs.issued_at = issued_at;
    obs
}
