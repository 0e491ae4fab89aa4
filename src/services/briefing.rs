//! Briefing generator.
//!
//! Turns a corridor profile into an overall severity and a passenger-readable
//! text. Pure and deterministic: the same profile and options always give the
//! same briefing, and every profile (even an empty one) gives a non-empty text.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::helpers::round_to;
use crate::models::{CorridorProfile, ProfileEntry, Severity};
use crate::services::advisories::{AdvisoryProduct, RouteAdvisories};
use crate::services::stations::{AirportConditions, FlightCategory};

/// Moderate and severe limits for each hazard.
#[derive(Debug, Clone, PartialEq)]
pub struct SeverityThresholds {
    /// Turbulence index (0..=1)
    pub turbulence: (f64, f64),
    /// Icing risk (0..=1)
    pub icing: (f64, f64),
    /// mm/h
    pub precipitation_mm_h: (f64, f64),
    /// Peak of mean wind and gust, knots
    pub wind_kt: (f64, f64),
    /// km; conditions are worse *below* these values
    pub visibility_km: (f64, f64),
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            turbulence: (0.4, 0.7),
            icing: (0.4, 0.7),
            precipitation_mm_h: (2.5, 7.5),
            wind_kt: (35.0, 50.0),
            visibility_km: (5.0, 1.5),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Hazard {
    Turbulence,
    Icing,
    Precipitation,
    Wind,
    Visibility,
}

impl Hazard {
    pub const ALL: [Hazard; 5] = [
        Hazard::Turbulence,
        Hazard::Icing,
        Hazard::Precipitation,
        Hazard::Wind,
        Hazard::Visibility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hazard::Turbulence => "turbulence",
            Hazard::Icing => "icing",
            Hazard::Precipitation => "precipitation",
            Hazard::Wind => "wind",
            Hazard::Visibility => "visibility",
        }
    }

    /// The value this hazard is judged on, if the entry has it.
    pub fn value(&self, entry: &ProfileEntry) -> Option<f64> {
        let obs = &entry.observation;
        match self {
            Hazard::Turbulence => obs.turbulence_index,
            Hazard::Icing => obs.icing_risk,
            Hazard::Precipitation => obs.precipitation_mm_h,
            Hazard::Wind => obs.peak_wind_kt(),
            Hazard::Visibility => obs.visibility_km,
        }
    }

    fn lower_is_worse(&self) -> bool {
        matches!(self, Hazard::Visibility)
    }
}

impl SeverityThresholds {
    fn limits(&self, hazard: Hazard) -> (f64, f64) {
        match hazard {
            Hazard::Turbulence => self.turbulence,
            Hazard::Icing => self.icing,
            Hazard::Precipitation => self.precipitation_mm_h,
            Hazard::Wind => self.wind_kt,
            Hazard::Visibility => self.visibility_km,
        }
    }

    /// Severity of one hazard value. Non-finite values count as calm.
    pub fn classify(&self, hazard: Hazard, value: f64) -> Severity {
        if !value.is_finite() {
            return Severity::Calm;
        }
        let (moderate, severe) = self.limits(hazard);
        if hazard.lower_is_worse() {
            if value < severe {
                Severity::Severe
            } else if value < moderate {
                Severity::Moderate
            } else {
                Severity::Calm
            }
        } else if value >= severe {
            Severity::Severe
        } else if value >= moderate {
            Severity::Moderate
        } else {
            Severity::Calm
        }
    }

    /// Worst hazard severity of a profile entry; calm when nothing is known.
    pub fn entry_severity(&self, entry: &ProfileEntry) -> Severity {
        Hazard::ALL
            .iter()
            .filter_map(|h| h.value(entry).map(|v| self.classify(*h, v)))
            .max()
            .unwrap_or(Severity::Calm)
    }

    /// Hazards at moderate or worse for an entry, worst first.
    pub fn entry_hazards(&self, entry: &ProfileEntry) -> Vec<(Hazard, Severity)> {
        let mut found: Vec<(Hazard, Severity)> = Hazard::ALL
            .iter()
            .filter_map(|h| h.value(entry).map(|v| (*h, self.classify(*h, v))))
            .filter(|(_, s)| *s >= Severity::Moderate)
            .collect();
        found.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        found
    }
}

/// A run of consecutive sample points where one hazard is moderate or worse.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HazardSegment {
    pub hazard: Hazard,
    pub severity: Severity,
    /// First and last sample point index of the run
    pub start_index: usize,
    pub end_index: usize,
    /// Flight hours (1 = first hour after departure)
    pub start_hour: u32,
    pub end_hour: u32,
    /// Worst value in the run (highest, or lowest for visibility)
    pub peak_value: f64,
}

impl HazardSegment {
    /// "near hour 2" or "between hours 1 and 3".
    pub fn when(&self) -> String {
        if self.start_hour == self.end_hour {
            format!("near hour {}", self.start_hour)
        } else {
            format!("between hours {} and {}", self.start_hour, self.end_hour)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum BriefingStyle {
    /// Headline plus one sentence per hazard
    #[default]
    #[serde(rename = "v1")]
    Summary,
    /// Three short sections: data, crew practice, uncertainty
    #[serde(rename = "v2")]
    Sectioned,
}

impl FromStr for BriefingStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "summary" => Ok(BriefingStyle::Summary),
            "v2" | "sectioned" => Ok(BriefingStyle::Sectioned),
            other => Err(format!(
                "unknown briefing version '{}', expected v1 or v2",
                other
            )),
        }
    }
}

impl fmt::Display for BriefingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BriefingStyle::Summary => write!(f, "v1"),
            BriefingStyle::Sectioned => write!(f, "v2"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BriefingOptions {
    pub style: BriefingStyle,
    /// Gentler wording for nervous flyers
    pub calm: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Briefing {
    pub severity: Severity,
    pub text: String,
    pub low_confidence: bool,
    pub style: BriefingStyle,
    pub hazards: Vec<HazardSegment>,
}

/// Generate the briefing for `profile`.
pub fn generate_briefing(
    route_label: &str,
    profile: &CorridorProfile,
    options: BriefingOptions,
    thresholds: &SeverityThresholds,
) -> Briefing {
    let severity = profile
        .entries
        .iter()
        .map(|e| thresholds.entry_severity(e))
        .max()
        .unwrap_or(Severity::Calm);
    let low_confidence = profile.is_empty() || profile.is_low_confidence();
    let hazards = hazard_segments(profile, thresholds);

    let text = if profile.is_empty() {
        format!(
            "{}: no weather data is available for this route, so no briefing can be given.",
            route_label
        )
    } else {
        match options.style {
            BriefingStyle::Summary => {
                summary_text(route_label, severity, &hazards, low_confidence, options.calm)
            }
            BriefingStyle::Sectioned => sectioned_text(
                route_label,
                profile,
                &hazards,
                low_confidence,
                options.calm,
            ),
        }
    };

    Briefing {
        severity,
        text,
        low_confidence,
        style: options.style,
        hazards,
    }
}

/// Runs of moderate-or-worse conditions, ordered by start point then hazard.
pub fn hazard_segments(
    profile: &CorridorProfile,
    thresholds: &SeverityThresholds,
) -> Vec<HazardSegment> {
    let Some(departure) = profile.entries.first().map(|e| e.sample.eta) else {
        return Vec::new();
    };
    let hour_of = |entry: &ProfileEntry| {
        let minutes = (entry.sample.eta - departure).num_minutes().max(0);
        (minutes / 60) as u32 + 1
    };

    let mut segments = Vec::new();
    for hazard in Hazard::ALL {
        let mut open: Option<HazardSegment> = None;
        for entry in &profile.entries {
            let level = hazard
                .value(entry)
                .map(|v| (v, thresholds.classify(hazard, v)))
                .filter(|(_, s)| *s >= Severity::Moderate);

            match (level, open.as_mut()) {
                (Some((value, severity)), Some(seg)) => {
                    seg.end_index = entry.sample.index;
                    seg.end_hour = hour_of(entry);
                    seg.severity = seg.severity.max(severity);
                    seg.peak_value = if hazard.lower_is_worse() {
                        seg.peak_value.min(value)
                    } else {
                        seg.peak_value.max(value)
                    };
                }
                (Some((value, severity)), None) => {
                    open = Some(HazardSegment {
                        hazard,
                        severity,
                        start_index: entry.sample.index,
                        end_index: entry.sample.index,
                        start_hour: hour_of(entry),
                        end_hour: hour_of(entry),
                        peak_value: value,
                    });
                }
                (None, _) => segments.extend(open.take()),
            }
        }
        segments.extend(open.take());
    }

    for seg in &mut segments {
        seg.peak_value = round_to(seg.peak_value, 2);
    }
    segments.sort_by(|a, b| a.start_index.cmp(&b.start_index).then(a.hazard.cmp(&b.hazard)));
    segments
}

fn hazard_phrase(hazard: Hazard, severity: Severity, calm: bool) -> &'static str {
    let severe = severity == Severity::Severe;
    match (hazard, calm, severe) {
        (Hazard::Turbulence, false, false) => "moderate turbulence",
        (Hazard::Turbulence, false, true) => "severe turbulence",
        (Hazard::Turbulence, true, false) => "some bumpy air",
        (Hazard::Turbulence, true, true) => "a stretch of rough air",
        (Hazard::Icing, false, false) => "moderate icing conditions",
        (Hazard::Icing, false, true) => "severe icing conditions",
        (Hazard::Icing, true, false) => "cold, moist air where ice can form",
        (Hazard::Icing, true, true) => "very cold, moist air where ice forms readily",
        (Hazard::Precipitation, false, false) => "moderate precipitation",
        (Hazard::Precipitation, false, true) => "heavy precipitation",
        (Hazard::Precipitation, true, false) => "some rain or snow",
        (Hazard::Precipitation, true, true) => "heavy rain or snow",
        (Hazard::Wind, false, false) => "strong winds",
        (Hazard::Wind, _, true) => "very strong winds",
        (Hazard::Wind, true, false) => "brisk winds",
        (Hazard::Visibility, false, false) => "reduced visibility",
        (Hazard::Visibility, false, true) => "poor visibility",
        (Hazard::Visibility, true, false) => "some haze or low cloud",
        (Hazard::Visibility, true, true) => "thick cloud or fog",
    }
}

fn summary_headline(route_label: &str, severity: Severity, calm: bool) -> String {
    let body = match (severity, calm) {
        (Severity::Calm, false) => "no significant weather along the route.",
        (Severity::Calm, true) => "the weather along the route looks quiet.",
        (Severity::Moderate, false) => "moderate weather along parts of the route.",
        (Severity::Moderate, true) => {
            "a few livelier stretches along the route, the kind airliners handle every day."
        }
        (Severity::Severe, false) => "significant weather along the route.",
        (Severity::Severe, true) => {
            "some rougher weather along the route; crews plan around conditions like these."
        }
    };
    format!("{}: {}", route_label, body)
}

const LOW_CONFIDENCE_NOTE: &str =
    "Some weather data along the route was missing or conflicting, so treat this briefing as approximate.";

fn summary_text(
    route_label: &str,
    severity: Severity,
    hazards: &[HazardSegment],
    low_confidence: bool,
    calm: bool,
) -> String {
    let mut parts = vec![summary_headline(route_label, severity, calm)];
    for seg in hazards {
        let phrase = hazard_phrase(seg.hazard, seg.severity, calm);
        parts.push(if calm {
            format!("There may be {} {}.", phrase, seg.when())
        } else {
            format!("Expect {} {}.", phrase, seg.when())
        });
    }
    if low_confidence {
        parts.push(LOW_CONFIDENCE_NOTE.to_string());
    }
    parts.join(" ")
}

fn crew_practice(hazard: Hazard) -> &'static str {
    match hazard {
        Hazard::Turbulence => {
            "Crews use pilot reports and forecasts to pick altitudes with calmer air and keep the seat belt sign on through bumpy patches."
        }
        Hazard::Icing => {
            "Airliners carry ice protection systems that crews switch on when flying through cold, moist cloud."
        }
        Hazard::Precipitation => {
            "Rain and snow are routine for airliners; crews mainly watch for the storms that sometimes come with them."
        }
        Hazard::Wind => {
            "Strong winds mostly change the flight time; near the ground, crews choose runways and approaches with the wind in mind."
        }
        Hazard::Visibility => {
            "Low visibility matters mainly near the airports, where instrument approaches are designed for it."
        }
    }
}

fn sectioned_text(
    route_label: &str,
    profile: &CorridorProfile,
    hazards: &[HazardSegment],
    low_confidence: bool,
    calm: bool,
) -> String {
    let sources: BTreeSet<&str> = profile
        .entries
        .iter()
        .flat_map(|e| e.sources.iter().map(String::as_str))
        .collect();
    let sources = if sources.is_empty() {
        "no named source".to_string()
    } else {
        sources.into_iter().collect::<Vec<_>>().join(", ")
    };

    let mut data = vec![format!(
        "{}: {} sample points, data from {}.",
        route_label,
        profile.entries.len(),
        sources
    )];
    if hazards.is_empty() {
        data.push(
            "None of the sampled points reach the moderate limits for turbulence, icing, precipitation, wind or visibility."
                .to_string(),
        );
    }
    for seg in hazards {
        data.push(format!(
            "The data shows {} {}.",
            hazard_phrase(seg.hazard, seg.severity, calm),
            seg.when()
        ));
    }
    if profile.filled_points > 0 {
        data.push(format!(
            "{} points had no data of their own and borrow from their neighbours.",
            profile.filled_points
        ));
    }

    let present: BTreeSet<Hazard> = hazards.iter().map(|s| s.hazard).collect();
    let practice = if present.is_empty() {
        "With quiet conditions like these, crews follow their normal procedures.".to_string()
    } else {
        present
            .into_iter()
            .map(crew_practice)
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut uncertainty = vec![
        "These figures come from forecasts and reports that cover an area and a time window, so actual conditions can differ from them."
            .to_string(),
    ];
    if low_confidence {
        uncertainty.push(
            "Some data along the route was missing, late or conflicting, which makes this picture less certain."
                .to_string(),
        );
    }

    [
        format!("What the data shows\n{}", data.join(" ")),
        format!("How crews usually handle this\n{}", practice),
        format!("Uncertainty and normal variability\n{}", uncertainty.join(" ")),
    ]
    .join("\n\n")
}

fn category_sentence(icao: &str, category: FlightCategory, calm: bool) -> String {
    match (category, calm) {
        (FlightCategory::Vfr, false) => format!("{} is reporting VFR conditions.", icao),
        (FlightCategory::Mvfr, false) => format!("{} is reporting marginal VFR conditions.", icao),
        (FlightCategory::Ifr, false) => format!(
            "{} is reporting IFR conditions with low cloud or poor visibility.",
            icao
        ),
        (FlightCategory::Lifr, false) => format!(
            "{} is reporting low IFR conditions with very low cloud or fog.",
            icao
        ),
        (FlightCategory::Vfr, true) => format!("{} currently has clear, open conditions.", icao),
        (FlightCategory::Mvfr, true) => format!("{} currently has some low cloud or haze.", icao),
        (FlightCategory::Ifr | FlightCategory::Lifr, true) => format!(
            "{} currently has low cloud or fog; crews land in conditions like these using instrument approaches.",
            icao
        ),
    }
}

fn product_phrase(product: AdvisoryProduct, count: usize) -> String {
    let name = match product {
        AdvisoryProduct::Sigmet => "SIGMET",
        AdvisoryProduct::Tango => "G-AIRMET Tango (turbulence)",
        AdvisoryProduct::Zulu => "G-AIRMET Zulu (icing)",
        AdvisoryProduct::Sierra => "G-AIRMET Sierra (IFR and mountain obscuration)",
    };
    format!("{} {}", count, name)
}

/// Add what the endpoint airports report and the advisories along the route.
///
/// Summary briefings get extra sentences, sectioned ones a fourth section.
/// Nothing changes when there is nothing to report.
pub fn add_reported_conditions(
    briefing: &mut Briefing,
    airports: &AirportConditions,
    advisories: &RouteAdvisories,
    calm: bool,
) {
    let mut sentences: Vec<String> = airports
        .stations
        .iter()
        .filter_map(|s| {
            s.flight_category()
                .map(|c| category_sentence(&s.icao, c, calm))
        })
        .collect();

    let total = advisories.advisories.len();
    if total > 0 {
        if calm {
            sentences.push(format!(
                "Forecasters have issued {} weather {} covering parts of the route; crews receive these before departure and plan around them.",
                total,
                if total == 1 { "advisory" } else { "advisories" }
            ));
        } else {
            let listed = AdvisoryProduct::ALL
                .iter()
                .map(|p| (*p, advisories.of(*p).count()))
                .filter(|(_, n)| *n > 0)
                .map(|(p, n)| product_phrase(p, n))
                .collect::<Vec<_>>()
                .join(", ");
            sentences.push(format!(
                "Advisories in effect along the route at this altitude: {}.",
                listed
            ));
        }
    }

    let missing: Vec<&str> = airports
        .missing_products
        .iter()
        .chain(advisories.missing_products.iter())
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        sentences.push(format!(
            "Some airport reports or advisories could not be retrieved ({}), so they are not included.",
            missing.join(", ")
        ));
    }

    if sentences.is_empty() {
        return;
    }
    let added = sentences.join(" ");
    match briefing.style {
        BriefingStyle::Summary => {
            briefing.text.push(' ');
            briefing.text.push_str(&added);
        }
        BriefingStyle::Sectioned => {
            briefing.text.push_str("\n\nAirport reports and advisories\n");
            briefing.text.push_str(&added);
        }
    }
}
