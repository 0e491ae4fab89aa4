//! Weather data fetcher.
//!
//! Fans a corridor's sample points out to every configured provider with
//! bounded concurrency and collects the results back in point order. Each
//! provider call is wrapped in its own timeout and retried with exponential
//! backoff on transient failures; the whole fan-out is bounded by a request
//! deadline after which unfinished points are abandoned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use thiserror::Error;

use crate::config::AppConfig;
use crate::models::{SamplePoint, TimeWindow, WeatherObservation};
use crate::services::provider::{ProviderError, WeatherProvider};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Timeout for a single provider call
    pub attempt_timeout: Duration,
    /// Extra attempts after the first, for transient failures only
    pub max_retries: u32,
    /// Backoff before retry `n` is `backoff * 2^n`
    pub backoff: Duration,
    /// Sample points fetched at once
    pub concurrency: usize,
    /// Budget for the whole corridor
    pub deadline: Duration,
    /// Half-width of the forecast window around each ETA
    pub window_half_width: chrono::Duration,
}

impl FetchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            attempt_timeout: config.http_timeout(),
            max_retries: config.fetch_max_retries,
            backoff: Duration::from_millis(config.fetch_backoff_ms),
            concurrency: config.fetch_concurrency.max(1),
            deadline: config.request_deadline(),
            window_half_width: chrono::Duration::minutes(config.forecast_window_minutes),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Every provider failed for a sample point.
///
/// Not fatal: the aggregator fills the point from a neighbour and the
/// briefing is marked low-confidence.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("no weather data for sample point {point_index}: {}", describe(.failures))]
pub struct DataUnavailableError {
    pub point_index: usize,
    /// Provider name and its final error
    pub failures: Vec<(String, ProviderError)>,
}

fn describe(failures: &[(String, ProviderError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{} ({})", name, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// What the providers returned for one sample point.
#[derive(Debug, Clone)]
pub struct PointFetch {
    pub point_index: usize,
    pub observations: Vec<WeatherObservation>,
    /// Providers that failed while at least one other succeeded
    pub failed_providers: Vec<String>,
}

pub type PointOutcome = Result<PointFetch, DataUnavailableError>;

/// Result of a corridor fan-out, one slot per sample point.
#[derive(Debug)]
pub struct CorridorFetch {
    /// `None` when the deadline expired before the point finished
    pub slots: Vec<Option<PointOutcome>>,
    pub deadline_exceeded: bool,
}

impl CorridorFetch {
    /// All observations gathered, in point order.
    pub fn observations(&self) -> Vec<WeatherObservation> {
        self.slots
            .iter()
            .flatten()
            .filter_map(|outcome| outcome.as_ref().ok())
            .flat_map(|fetch| fetch.observations.iter().cloned())
            .collect()
    }

    /// Points where every provider failed.
    pub fn unavailable_points(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Some(Err(_))))
            .count()
    }

    /// Points abandoned at the deadline.
    pub fn abandoned_points(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    /// Observation count per provider name.
    pub fn provider_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for obs in self.observations() {
            *counts.entry(obs.source).or_insert(0) += 1;
        }
        counts
    }
}

/// Call one provider with a per-attempt timeout, retrying transient failures.
pub async fn fetch_with_retry(
    provider: &dyn WeatherProvider,
    point: &SamplePoint,
    window: TimeWindow,
    settings: &FetchSettings,
) -> Result<Vec<WeatherObservation>, ProviderError> {
    let mut attempt = 0;
    loop {
        let err = match tokio::time::timeout(settings.attempt_timeout, provider.fetch(point, window))
            .await
        {
            Ok(Ok(observations)) => return Ok(observations),
            Ok(Err(err)) if !err.is_transient() => return Err(err),
            Ok(Err(err)) => err,
            Err(_) => ProviderError::Transient(format!(
                "{} timed out after {}ms",
                provider.name(),
                settings.attempt_timeout.as_millis()
            )),
        };

        if attempt >= settings.max_retries {
            tracing::warn!(
                "{} failed for point {} after {} attempts: {}",
                provider.name(),
                point.index,
                attempt + 1,
                err
            );
            return Err(err);
        }

        let backoff = settings.backoff_for(attempt);
        tracing::debug!(
            "{} attempt {} for point {} failed ({}), retrying in {}ms",
            provider.name(),
            attempt + 1,
            point.index,
            err,
            backoff.as_millis()
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

/// Query every provider for one point concurrently.
///
/// Succeeds when at least one provider answered, even with no observations.
pub async fn fetch_point(
    providers: &[Arc<dyn WeatherProvider>],
    point: &SamplePoint,
    settings: &FetchSettings,
) -> PointOutcome {
    let window = TimeWindow::around(point.eta, settings.window_half_width);

    let results = join_all(
        providers
            .iter()
            .map(|p| fetch_with_retry(p.as_ref(), point, window, settings)),
    )
    .await;

    let mut observations = Vec::new();
    let mut failures = Vec::new();
    let mut any_success = false;

    for (provider, result) in providers.iter().zip(results) {
        match result {
            Ok(obs) => {
                any_success = true;
                observations.extend(obs.into_iter().map(|mut o| {
                    o.point_index = point.index;
                    o
                }));
            }
            Err(err) => failures.push((provider.name().to_string(), err)),
        }
    }

    if !any_success {
        return Err(DataUnavailableError {
            point_index: point.index,
            failures,
        });
    }

    Ok(PointFetch {
        point_index: point.index,
        observations,
        failed_providers: failures.into_iter().map(|(name, _)| name).collect(),
    })
}

/// Fetch weather for every sample point, at most `concurrency` points at a
/// time, until all finish or the deadline passes.
pub async fn fetch_corridor(
    providers: &[Arc<dyn WeatherProvider>],
    points: &[SamplePoint],
    settings: &FetchSettings,
) -> CorridorFetch {
    let deadline = tokio::time::Instant::now() + settings.deadline;
    let mut slots: Vec<Option<PointOutcome>> = (0..points.len()).map(|_| None).collect();

    let mut pending = stream::iter((0..points.len()).map(|slot| {
        let point = &points[slot];
        async move { (slot, fetch_point(providers, point, settings).await) }
    }))
    .buffer_unordered(settings.concurrency.max(1));

    let mut deadline_exceeded = false;
    loop {
        match tokio::time::timeout_at(deadline, pending.next()).await {
            Ok(Some((slot, outcome))) => {
                match &outcome {
                    Err(err) => tracing::warn!("{}", err),
                    Ok(fetch) if !fetch.failed_providers.is_empty() => tracing::debug!(
                        "Point {} degraded, failed providers: {}",
                        fetch.point_index,
                        fetch.failed_providers.join(", ")
                    ),
                    Ok(_) => {}
                }
                slots[slot] = Some(outcome);
            }
            Ok(None) => break,
            Err(_) => {
                deadline_exceeded = true;
                break;
            }
        }
    }

    let result = CorridorFetch {
        slots,
        deadline_exceeded,
    };

    if deadline_exceeded {
        tracing::warn!(
            "Request deadline of {}s passed with {} of {} points unfinished",
            settings.deadline.as_secs_f64(),
            result.abandoned_points(),
            points.len()
        );
    } else {
        tracing::debug!(
            "Fetched {} points: {} observations, {} unavailable",
            points.len(),
            result.observations().len(),
            result.unavailable_points()
        );
    }

    result
}
