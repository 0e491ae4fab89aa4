//! Corridor aggregator.
//!
//! Merges the observations gathered for each sample point into one profile
//! entry per point:
//! - the most recently issued observation wins
//! - several equally recent observations are averaged and flagged low-confidence
//! - fields the winner lacks are taken from the next most recent observation
//!   that has them
//! - points without any observation are filled from the nearest observed
//!   neighbour, unless too many are missing
//!
//! Inputs are put into a canonical order before merging, so the profile does
//! not depend on the order in which fetches completed.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::helpers::mean;
use crate::models::{
    Confidence, CorridorProfile, EntryOrigin, ProfileEntry, SamplePoint, WeatherObservation,
    WindVector,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IncompleteProfileError {
    #[error("no weather data for any of the {total} sample points")]
    NoData { total: usize },
    #[error(
        "{missing} of {total} sample points have no weather data (at most {:.0}% allowed)",
        .max_fraction * 100.0
    )]
    TooManyMissing {
        missing: usize,
        total: usize,
        max_fraction: f64,
    },
}

/// Build the corridor profile for `points` from `observations`.
///
/// `degraded` records that the fetch deadline expired; it is carried into the
/// profile and lowers the briefing's confidence.
pub fn aggregate(
    points: &[SamplePoint],
    observations: &[WeatherObservation],
    max_missing_fraction: f64,
    degraded: bool,
) -> Result<CorridorProfile, IncompleteProfileError> {
    let mut points: Vec<&SamplePoint> = points.iter().collect();
    points.sort_by_key(|p| p.index);
    let total = points.len();

    let mut by_point: BTreeMap<usize, Vec<&WeatherObservation>> = BTreeMap::new();
    for obs in observations {
        by_point.entry(obs.point_index).or_default().push(obs);
    }

    let merged: Vec<Option<Merged>> = points
        .iter()
        .map(|p| by_point.get(&p.index).map(|group| merge(p.index, group)))
        .collect();

    let observed = merged.iter().filter(|m| m.is_some()).count();
    let missing = total - observed;

    if observed == 0 {
        return Err(IncompleteProfileError::NoData { total });
    }
    if missing as f64 / total as f64 > max_missing_fraction {
        return Err(IncompleteProfileError::TooManyMissing {
            missing,
            total,
            max_fraction: max_missing_fraction,
        });
    }

    let entries = points
        .iter()
        .enumerate()
        .map(|(pos, point)| match &merged[pos] {
            Some(m) => ProfileEntry {
                sample: (*point).clone(),
                observation: m.observation.clone(),
                confidence: m.confidence,
                origin: m.origin,
                sources: m.sources.clone(),
            },
            None => {
                let from = nearest_observed(&merged, pos);
                let neighbour = merged[from]
                    .as_ref()
                    .map(|m| m.observation.clone())
                    .unwrap_or_else(|| {
                        WeatherObservation::empty(point.index, point.eta, "none")
                    });
                let sources = merged[from]
                    .as_ref()
                    .map(|m| m.sources.clone())
                    .unwrap_or_default();
                tracing::debug!(
                    "Filling sample point {} from point {}",
                    point.index,
                    points[from].index
                );
                ProfileEntry {
                    sample: (*point).clone(),
                    observation: WeatherObservation {
                        point_index: point.index,
                        ..neighbour
                    },
                    confidence: Confidence::Low,
                    origin: EntryOrigin::Filled,
                    sources,
                }
            }
        })
        .collect();

    if missing > 0 {
        tracing::warn!(
            "{} of {} sample points had no weather data and were filled",
            missing,
            total
        );
    }

    Ok(CorridorProfile {
        entries,
        observed_points: observed,
        filled_points: missing,
        degraded,
    })
}

struct Merged {
    observation: WeatherObservation,
    confidence: Confidence,
    origin: EntryOrigin,
    sources: Vec<String>,
}

/// Position of the closest observed entry; the earlier one wins a tie.
fn nearest_observed(merged: &[Option<Merged>], pos: usize) -> usize {
    (0..merged.len())
        .filter(|&i| merged[i].is_some())
        .min_by_key(|&i| (i.abs_diff(pos), i))
        .unwrap_or(pos)
}

fn merge(point_index: usize, group: &[&WeatherObservation]) -> Merged {
    let mut ordered: Vec<&WeatherObservation> = group.to_vec();
    ordered.sort_by(|a, b| canonical_cmp(a, b));

    let latest_issue = ordered[0].issued_at;
    let (latest, older): (Vec<&WeatherObservation>, Vec<&WeatherObservation>) = ordered
        .into_iter()
        .partition(|o| o.issued_at == latest_issue);

    let mut sources: BTreeSet<String> = latest.iter().map(|o| o.source.clone()).collect();

    let (mut observation, confidence, origin) = if latest.len() == 1 {
        (latest[0].clone(), Confidence::High, EntryOrigin::Single)
    } else {
        (average(&latest), Confidence::Low, EntryOrigin::Averaged)
    };
    observation.point_index = point_index;

    // Older observations only supply fields the newest ones lack.
    for obs in older {
        let mut used = false;
        used |= fill(&mut observation.wind, obs.wind);
        used |= fill(&mut observation.gust_kt, obs.gust_kt);
        used |= fill(&mut observation.precipitation_mm_h, obs.precipitation_mm_h);
        used |= fill(&mut observation.turbulence_index, obs.turbulence_index);
        used |= fill(&mut observation.icing_risk, obs.icing_risk);
        used |= fill(&mut observation.visibility_km, obs.visibility_km);
        used |= fill(&mut observation.temperature_c, obs.temperature_c);
        if used {
            sources.insert(obs.source.clone());
        }
    }

    Merged {
        observation,
        confidence,
        origin,
        sources: sources.into_iter().collect(),
    }
}

fn fill<T: Copy>(slot: &mut Option<T>, candidate: Option<T>) -> bool {
    if slot.is_none() && candidate.is_some() {
        *slot = candidate;
        true
    } else {
        false
    }
}

/// Average equally recent observations field by field. Wind is averaged as
/// vector components so opposing winds cancel instead of rotating.
fn average(group: &[&WeatherObservation]) -> WeatherObservation {
    let first = group[0];
    let field = |get: fn(&WeatherObservation) -> Option<f64>| mean(group.iter().filter_map(|o| get(o)));

    let winds: Vec<(f64, f64)> = group
        .iter()
        .filter_map(|o| o.wind.map(|w| w.components()))
        .collect();
    let wind = match (mean(winds.iter().map(|c| c.0)), mean(winds.iter().map(|c| c.1))) {
        (Some(u), Some(v)) => Some(WindVector::from_components(u, v)),
        _ => None,
    };

    let names: BTreeSet<&str> = group.iter().map(|o| o.source.as_str()).collect();

    WeatherObservation {
        point_index: first.point_index,
        valid_time: group.iter().map(|o| o.valid_time).max().unwrap_or(first.valid_time),
        issued_at: first.issued_at,
        source: names.into_iter().collect::<Vec<_>>().join("+"),
        wind,
        gust_kt: field(|o| o.gust_kt),
        precipitation_mm_h: field(|o| o.precipitation_mm_h),
        turbulence_index: field(|o| o.turbulence_index),
        icing_risk: field(|o| o.icing_risk),
        visibility_km: field(|o| o.visibility_km),
        temperature_c: field(|o| o.temperature_c),
    }
}

/// Newest issue first (unknown issue time last), then a fixed order on
/// everything else so equal inputs always merge the same way.
fn canonical_cmp(a: &WeatherObservation, b: &WeatherObservation) -> Ordering {
    let issue = |o: &WeatherObservation| o.issued_at.map(|t| t.timestamp_millis());
    issue(b)
        .cmp(&issue(a))
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.valid_time.cmp(&b.valid_time))
        .then_with(|| {
            let key = |o: &WeatherObservation| {
                [
                    o.wind.map(|w| w.direction_deg),
                    o.wind.map(|w| w.speed_kt),
                    o.gust_kt,
                    o.precipitation_mm_h,
                    o.turbulence_index,
                    o.icing_risk,
                    o.visibility_km,
                    o.temperature_c,
                ]
            };
            key(a)
                .iter()
                .zip(key(b).iter())
                .map(|(x, y)| cmp_opt_f64(*x, *y))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        })
}

fn cmp_opt_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
