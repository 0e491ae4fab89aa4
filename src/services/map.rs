//! Map renderer and artifact store.
//!
//! Renders a corridor profile as a self-contained Leaflet page and keeps the
//! result in memory under an opaque id for `GET /maps/{id}.html`.
//!
//! Architecture:
//! - `render_map` is pure: profile and overlays in, HTML out. All user-supplied
//!   and upstream text is HTML-escaped and the embedded JSON cannot close its
//!   `<script>` element.
//! - Overlays are the endpoint airports' METAR/TAF, drawn as popups with a
//!   flight-category ring, and one toggleable layer per advisory product.
//!   Advisory layers start hidden for calm briefings.
//! - `MapStore` is an `Arc<RwLock<HashMap>>` shared through `AppState`.
//!   Artifacts older than the retention window are invisible to `get`, removed
//!   on lookup, and swept periodically by `run_map_sweeper`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::helpers::round_to;
use crate::models::{Confidence, CorridorProfile, EntryOrigin, ProfileEntry, Severity};
use crate::services::advisories::{Advisory, AdvisoryProduct, RouteAdvisories};
use crate::services::briefing::{Briefing, SeverityThresholds};
use crate::services::corridor::{Route, Waypoint};
use crate::services::stations::{AirportConditions, StationWeather, UNKNOWN_CATEGORY_COLOR};

/// How often the sweeper wakes to drop expired artifacts (seconds).
const SWEEP_INTERVAL_SECS: u64 = 60;

/// Longest id `get` will consider.
const MAX_ID_LEN: usize = 64;

const METRES_PER_NM: f64 = 1852.0;

#[derive(Debug, Error, PartialEq)]
pub enum RenderError {
    #[error("cannot render a map for an empty corridor profile")]
    EmptyProfile,
    #[error("failed to serialise map data: {0}")]
    Serialize(String),
}

/// A rendered map page. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct MapArtifact {
    pub id: String,
    pub html: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
}

/// Upstream reports drawn on top of the corridor.
#[derive(Debug, Clone, Default)]
pub struct MapOverlays {
    pub airports: AirportConditions,
    pub advisories: RouteAdvisories,
    /// Start with the advisory layers hidden
    pub calm: bool,
}

#[derive(Serialize)]
struct MapData {
    route: Vec<[f64; 2]>,
    samples: Vec<MapSample>,
    endpoints: Vec<MapEndpoint>,
    advisory_layers: Vec<MapAdvisoryLayer>,
    corridor_m: f64,
}

#[derive(Serialize)]
struct MapSample {
    lat: f64,
    lon: f64,
    color: &'static str,
    popup: String,
}

#[derive(Serialize)]
struct MapEndpoint {
    lat: f64,
    lon: f64,
    label: String,
    /// Flight-category colour, set when the airport has reports
    color: Option<&'static str>,
    popup: Option<String>,
}

#[derive(Serialize)]
struct MapAdvisoryLayer {
    name: &'static str,
    show: bool,
    areas: Vec<MapAdvisory>,
}

#[derive(Serialize)]
struct MapAdvisory {
    color: &'static str,
    tooltip: String,
    popup: String,
    rings: Vec<Vec<Vec<[f64; 2]>>>,
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Calm => "#2e7d32",
        Severity::Moderate => "#f9a825",
        Severity::Severe => "#c62828",
    }
}

/// Render the corridor map for `route` with a fresh id.
pub fn render_map(
    route: &Route,
    profile: &CorridorProfile,
    briefing: &Briefing,
    thresholds: &SeverityThresholds,
    corridor_half_width_nm: f64,
    overlays: &MapOverlays,
) -> Result<MapArtifact, RenderError> {
    if profile.is_empty() {
        return Err(RenderError::EmptyProfile);
    }

    let title = format!("{} route weather", route.label());

    let data = MapData {
        route: profile
            .entries
            .iter()
            .map(|e| [e.sample.latitude, e.sample.longitude])
            .collect(),
        samples: profile
            .entries
            .iter()
            .map(|e| MapSample {
                lat: e.sample.latitude,
                lon: e.sample.longitude,
                color: severity_color(thresholds.entry_severity(e)),
                popup: popup_html(e, thresholds),
            })
            .collect(),
        endpoints: [route.origin(), route.destination()]
            .into_iter()
            .map(|wp| endpoint(wp, &overlays.airports))
            .collect(),
        advisory_layers: AdvisoryProduct::ALL
            .iter()
            .map(|product| MapAdvisoryLayer {
                name: product.layer_name(),
                show: !overlays.calm,
                areas: overlays.advisories.of(*product).map(advisory_area).collect(),
            })
            .filter(|layer| !layer.areas.is_empty())
            .collect(),
        corridor_m: corridor_half_width_nm * METRES_PER_NM,
    };

    let data_json = serde_json::to_string(&data)
        .map_err(|e| RenderError::Serialize(e.to_string()))?
        // Keep the payload from terminating its <script> element.
        .replace("</", "<\\/");

    let html = page_html(&title, briefing, &data_json);

    Ok(MapArtifact {
        id: Uuid::new_v4().to_string(),
        html,
        created_at: Utc::now(),
        title,
    })
}

fn endpoint(wp: &Waypoint, airports: &AirportConditions) -> MapEndpoint {
    let name = wp.name.as_deref().unwrap_or("Waypoint");
    let station = wp
        .name
        .as_deref()
        .and_then(|n| airports.station(&n.trim().to_uppercase()));
    MapEndpoint {
        lat: wp.latitude,
        lon: wp.longitude,
        label: html_escape::encode_text(name).into_owned(),
        color: station.map(|s| {
            s.flight_category()
                .map(|c| c.color())
                .unwrap_or(UNKNOWN_CATEGORY_COLOR)
        }),
        popup: station.map(station_popup_html),
    }
}

fn station_popup_html(station: &StationWeather) -> String {
    let mut html = format!("<b>{}</b>", html_escape::encode_text(&station.icao));
    if let Some(category) = station.flight_category() {
        html.push_str(&format!(
            " <span style=\"color:#fff;background:{};border-radius:3px;padding:0 4px\">{}</span>",
            category.color(),
            category.as_str()
        ));
    }
    let report = |label: &str, raw: Option<&str>| match raw {
        Some(raw) => format!(
            "<br><b>{}</b><pre>{}</pre>",
            label,
            html_escape::encode_text(raw)
        ),
        None => format!("<br>No {} available", label),
    };
    html.push_str(&report("METAR", station.metar.as_ref().map(|m| m.raw.as_str())));
    html.push_str(&report("TAF", station.taf.as_ref().map(|t| t.raw.as_str())));
    html
}

fn advisory_area(advisory: &Advisory) -> MapAdvisory {
    let hazard = html_escape::encode_text(&advisory.hazard).into_owned();
    let band = advisory.band_label();
    let tooltip = if band.is_empty() {
        hazard.clone()
    } else {
        format!("{} {}", hazard, band)
    };
    let mut popup = format!("<b>{}</b>", tooltip);
    if let Some(raw) = &advisory.raw_text {
        popup.push_str(&format!("<pre>{}</pre>", html_escape::encode_text(raw)));
    }
    MapAdvisory {
        color: advisory.color(),
        tooltip,
        popup,
        rings: advisory.lat_lon_rings(),
    }
}

fn popup_html(entry: &ProfileEntry, thresholds: &SeverityThresholds) -> String {
    let obs = &entry.observation;
    let mut lines = vec![
        format!("<b>Point {}</b>", entry.sample.index),
        format!("ETA {}", entry.sample.eta.format("%H:%MZ")),
        format!(
            "FL{:03} &middot; {} NM from departure",
            (entry.sample.altitude_ft / 100.0).round() as i64,
            round_to(entry.sample.distance_nm, 0)
        ),
    ];

    if let Some(wind) = obs.wind {
        let gust = obs
            .gust_kt
            .map(|g| format!(" gusting {} kt", round_to(g, 0)))
            .unwrap_or_default();
        lines.push(format!(
            "Wind {:03}&deg; at {} kt{}",
            round_to(wind.direction_deg, 0) as i64,
            round_to(wind.speed_kt, 0),
            gust
        ));
    }
    if let Some(t) = obs.temperature_c {
        lines.push(format!("Temperature {} &deg;C", round_to(t, 0)));
    }

    let hazards = thresholds.entry_hazards(entry);
    if hazards.is_empty() {
        lines.push("No significant hazards".to_string());
    } else {
        let list = hazards
            .iter()
            .map(|(h, s)| format!("{} ({})", h.as_str(), s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Hazards: {}", list));
    }

    let confidence = match (entry.origin, entry.confidence) {
        (EntryOrigin::Filled, _) => "low (no data here, copied from a neighbour)",
        (EntryOrigin::Averaged, _) => "low (sources disagreed and were averaged)",
        (_, Confidence::Low) => "low",
        (_, Confidence::High) => "high",
    };
    lines.push(format!("Confidence: {}", confidence));

    if !entry.sources.is_empty() {
        lines.push(format!(
            "Sources: {}",
            html_escape::encode_text(&entry.sources.join(", "))
        ));
    }

    lines.join("<br>")
}

fn page_html(title: &str, briefing: &Briefing, data_json: &str) -> String {
    let title = html_escape::encode_text(title);
    let text = html_escape::encode_text(&briefing.text);
    let severity = briefing.severity.as_str();
    let color = severity_color(briefing.severity);
    let confidence = if briefing.low_confidence {
        "<p class=\"caveat\">Low confidence</p>"
    } else {
        ""
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>
html, body {{ margin: 0; height: 100%; font-family: system-ui, sans-serif; }}
#map {{ position: absolute; inset: 0; }}
#briefing {{ position: absolute; z-index: 1000; top: 12px; right: 12px; max-width: 360px;
  background: rgba(255, 255, 255, 0.95); border-radius: 8px; padding: 12px 14px;
  box-shadow: 0 2px 8px rgba(0, 0, 0, 0.25); }}
#briefing h1 {{ font-size: 15px; margin: 0 0 6px; }}
#briefing .severity {{ display: inline-block; color: #fff; background: {color};
  border-radius: 4px; padding: 1px 8px; font-size: 12px; text-transform: uppercase; }}
#briefing .text {{ white-space: pre-line; font-size: 13px; line-height: 1.4; }}
#briefing .caveat {{ color: #6d4c41; font-size: 12px; margin: 6px 0 0; }}
</style>
</head>
<body>
<div id="map"></div>
<div id="briefing">
<h1>{title}</h1>
<span class="severity">{severity}</span>
<p class="text">{text}</p>
{confidence}
</div>
<script>
const data = {data_json};
const map = L.map('map');
L.tileLayer('https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png', {{
  maxZoom: 18,
  attribution: '&copy; OpenStreetMap contributors'
}}).addTo(map);
const line = L.polyline(data.route, {{ color: '#1565c0', weight: 3 }}).addTo(map);
data.samples.forEach(function (s) {{
  L.circle([s.lat, s.lon], {{ radius: data.corridor_m, stroke: false, fillColor: '#1565c0', fillOpacity: 0.06 }}).addTo(map);
  L.circleMarker([s.lat, s.lon], {{ radius: 6, color: s.color, fillColor: s.color, fillOpacity: 0.9 }})
    .bindPopup(s.popup)
    .addTo(map);
}});
data.endpoints.forEach(function (e) {{
  const marker = L.marker([e.lat, e.lon]).bindTooltip(e.label).addTo(map);
  if (e.popup) {{
    marker.bindPopup(e.popup, {{ maxWidth: 420 }});
    L.circleMarker([e.lat, e.lon], {{ radius: 12, color: e.color, weight: 3, fill: false }}).addTo(map);
  }}
}});
const overlays = {{}};
data.advisory_layers.forEach(function (layer) {{
  const group = L.layerGroup();
  layer.areas.forEach(function (a) {{
    L.polygon(a.rings, {{ color: a.color, weight: 2, fillOpacity: 0.12 }})
      .bindTooltip(a.tooltip)
      .bindPopup(a.popup)
      .addTo(group);
  }});
  if (layer.show) group.addTo(map);
  overlays[layer.name] = group;
}});
if (Object.keys(overlays).length > 0) L.control.layers(null, overlays).addTo(map);
map.fitBounds(line.getBounds(), {{ padding: [30, 30] }});
</script>
</body>
</html>
"#
    )
}

/// In-memory id -> artifact store with a retention window.
#[derive(Debug, Clone)]
pub struct MapStore {
    maps: Arc<RwLock<HashMap<String, MapArtifact>>>,
    ttl: chrono::Duration,
}

impl MapStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            maps: Arc::new(RwLock::new(HashMap::new())),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    /// Store an artifact and return its id.
    pub async fn insert(&self, artifact: MapArtifact) -> String {
        let id = artifact.id.clone();
        tracing::debug!("Stored map {} ({})", id, artifact.title);
        self.maps.write().await.insert(id.clone(), artifact);
        id
    }

    /// Look up a live artifact. Malformed ids are treated as unknown.
    pub async fn get(&self, id: &str) -> Option<MapArtifact> {
        if !is_valid_id(id) {
            return None;
        }

        let now = Utc::now();
        {
            let maps = self.maps.read().await;
            match maps.get(id) {
                None => return None,
                Some(artifact) if !self.is_expired(artifact, now) => {
                    return Some(artifact.clone());
                }
                Some(_) => {}
            }
        }

        self.maps.write().await.remove(id);
        tracing::debug!("Map {} expired on lookup", id);
        None
    }

    /// Drop every expired artifact, returning how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut maps = self.maps.write().await;
        let before = maps.len();
        maps.retain(|_, artifact| !self.is_expired(artifact, now));
        before - maps.len()
    }

    pub async fn len(&self) -> usize {
        self.maps.read().await.len()
    }

    fn is_expired(&self, artifact: &MapArtifact, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(artifact.created_at) > self.ttl
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Periodically sweep expired maps. Runs until the process exits.
pub async fn run_map_sweeper(store: MapStore) {
    tracing::info!("Map sweeper started");
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
        let removed = store.sweep().await;
        if removed > 0 {
            tracing::debug!(
                "Map sweeper removed {} expired maps, {} kept",
                removed,
                store.len().await
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SamplePoint, WeatherObservation, WindVector};
    use crate::services::briefing::{generate_briefing, BriefingOptions};
    use crate::services::stations::{FlightCategory, Metar, Taf};
    use crate::services::corridor::Waypoint;
    use crate::services::test_support::departure;

    fn route(origin_name: &str) -> Route {
        Route::new(
            vec![
                Waypoint::new(40.0, -100.0).named(origin_name),
                Waypoint::new(40.0, -98.0).named("KDST"),
            ],
            35_000.0,
            departure(),
            450.0,
        )
        .unwrap()
    }

    fn profile(turbulence: &[f64]) -> CorridorProfile {
        let entries: Vec<ProfileEntry> = turbulence
            .iter()
            .enumerate()
            .map(|(index, t)| {
                let eta = departure() + chrono::Duration::minutes(10 * index as i64);
                let mut obs = WeatherObservation::empty(index, eta, "yr.no");
                obs.turbulence_index = Some(*t);
                obs.wind = Some(WindVector {
                    direction_deg: 90.0,
                    speed_kt: 22.0,
                });
                ProfileEntry {
                    sample: SamplePoint {
                        index,
                        latitude: 40.0,
                        longitude: -100.0 + index as f64,
                        altitude_ft: 35_000.0,
                        distance_nm: index as f64 * 46.0,
                        eta,
                    },
                    observation: obs,
                    confidence: Confidence::High,
                    origin: EntryOrigin::Single,
                    sources: vec!["yr.no".to_string()],
                }
            })
            .collect();
        CorridorProfile {
            observed_points: entries.len(),
            entries,
            filled_points: 0,
            degraded: false,
        }
    }

    fn render(origin_name: &str, p: &CorridorProfile) -> Result<MapArtifact, RenderError> {
        render_with(origin_name, p, &MapOverlays::default())
    }

    fn render_with(
        origin_name: &str,
        p: &CorridorProfile,
        overlays: &MapOverlays,
    ) -> Result<MapArtifact, RenderError> {
        let r = route(origin_name);
        let thresholds = SeverityThresholds::default();
        let briefing = generate_briefing(&r.label(), p, BriefingOptions::default(), &thresholds);
        render_map(&r, p, &briefing, &thresholds, 50.0, overlays)
    }

    fn overlays(calm: bool) -> MapOverlays {
        MapOverlays {
            airports: AirportConditions {
                stations: vec![StationWeather {
                    icao: "KORG".to_string(),
                    metar: Some(Metar {
                        raw: "KORG 010752Z 00000KT 1/2SM FG </script><b>x</b>".to_string(),
                        flight_category: Some(FlightCategory::Lifr),
                        observed_at: None,
                        visibility_km: Some(0.8),
                        latitude: Some(40.0),
                        longitude: Some(-100.0),
                    }),
                    taf: Some(Taf {
                        raw: "TAF KORG 010520Z 0106/0212 VRB03KT 1/4SM FG".to_string(),
                        issued_at: None,
                    }),
                }],
                missing_products: Vec::new(),
            },
            advisories: RouteAdvisories {
                advisories: vec![Advisory {
                    product: AdvisoryProduct::Tango,
                    hazard: "TURB-HI".to_string(),
                    base_fl: Some(280.0),
                    top_fl: Some(400.0),
                    raw_text: None,
                    area: vec![geo::Polygon::new(
                        geo::LineString::from(vec![
                            (-99.5, 39.5),
                            (-98.5, 39.5),
                            (-98.5, 40.5),
                            (-99.5, 39.5),
                        ]),
                        Vec::new(),
                    )],
                }],
                missing_products: Vec::new(),
            },
            calm,
        }
    }

    fn artifact(id: &str, age: chrono::Duration) -> MapArtifact {
        MapArtifact {
            id: id.to_string(),
            html: "<html></html>".to_string(),
            created_at: Utc::now() - age,
            title: "t".to_string(),
        }
    }

    #[test]
    fn test_empty_profile_is_render_error() {
        let err = render("KORG", &profile(&[])).unwrap_err();
        assert_eq!(err, RenderError::EmptyProfile);
    }

    #[test]
    fn test_render_contains_route_and_briefing() {
        let map = render("KORG", &profile(&[0.1, 0.5, 0.9])).unwrap();
        assert!(Uuid::parse_str(&map.id).is_ok());
        assert_eq!(map.title, "KORG → KDST route weather");
        assert!(map.html.starts_with("<!DOCTYPE html>"));
        assert!(map.html.contains("leaflet.js"));
        assert!(map.html.contains("KORG → KDST route weather"));
        assert!(map.html.contains(severity_color(Severity::Severe)));
        assert!(map.html.contains(severity_color(Severity::Moderate)));
        assert!(map.html.contains("turbulence (severe)"));
        assert!(map.html.contains("\"corridor_m\":92600.0"));
    }

    #[test]
    fn test_user_text_is_escaped() {
        let map = render("</script><img src=x onerror=alert(1)>", &profile(&[0.1, 0.2])).unwrap();
        assert!(!map.html.contains("<img src=x"));
        assert!(!map.html.contains("</script><img"));
        assert!(map.html.contains("&lt;img src=x onerror=alert(1)&gt;"));
    }

    #[test]
    fn test_airport_reports_and_advisories_are_drawn() {
        let map = render_with("KORG", &profile(&[0.1, 0.2]), &overlays(false)).unwrap();

        // Category ring and badge
        assert!(map.html.contains(FlightCategory::Lifr.color()));
        assert!(map.html.contains(">LIFR<\\/span>"));
        // Raw reports are escaped and cannot close the script element
        assert!(map.html.contains("TAF KORG 010520Z"));
        assert!(map.html.contains("&lt;/script&gt;&lt;b&gt;x&lt;/b&gt;"));
        assert!(!map.html.contains("</script><b>"));
        // The destination has no reports of its own
        assert!(map.html.contains("\"label\":\"KDST\",\"color\":null,\"popup\":null"));

        assert!(map.html.contains("G-AIRMET (Tango - Turb)"));
        assert!(map.html.contains("TURB-HI FL280-FL400"));
        assert!(map.html.contains("\"show\":true"));
        assert!(!map.html.contains("G-AIRMET (Zulu - Icing)"));
    }

    #[test]
    fn test_calm_briefing_hides_advisory_layers() {
        let map = render_with("KORG", &profile(&[0.1, 0.2]), &overlays(true)).unwrap();
        assert!(map.html.contains("G-AIRMET (Tango - Turb)"));
        assert!(map.html.contains("\"show\":false"));
    }

    #[test]
    fn test_without_overlays_no_layer_control_data() {
        let map = render("KORG", &profile(&[0.1, 0.2])).unwrap();
        assert!(map.html.contains("\"advisory_layers\":[]"));
        assert!(map.html.contains("\"label\":\"KORG\",\"color\":null,\"popup\":null"));
    }

    #[test]
    fn test_each_render_gets_a_new_id() {
        let p = profile(&[0.1, 0.2]);
        let a = render("KORG", &p).unwrap();
        let b = render("KORG", &p).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let store = MapStore::new(std::time::Duration::from_secs(3600));
        let map = render("KORG", &profile(&[0.1, 0.2])).unwrap();
        let id = store.insert(map.clone()).await;
        assert_eq!(store.get(&id).await, Some(map));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids() {
        let store = MapStore::new(std::time::Duration::from_secs(3600));
        store.insert(artifact("abc-123", chrono::Duration::zero())).await;
        assert!(store.get("abc-124").await.is_none());
        assert!(store.get("../abc-123").await.is_none());
        assert!(store.get("").await.is_none());
        assert!(store.get(&"a".repeat(65)).await.is_none());
        assert!(store.get("abc-123").await.is_some());
    }

    #[tokio::test]
    async fn test_expired_map_is_not_found_and_removed() {
        let store = MapStore::new(std::time::Duration::from_secs(60));
        store.insert(artifact("old", chrono::Duration::seconds(61))).await;
        assert!(store.get("old").await.is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = MapStore::new(std::time::Duration::from_secs(60));
        store.insert(artifact("old", chrono::Duration::seconds(120))).await;
        store.insert(artifact("older", chrono::Duration::hours(2))).await;
        store.insert(artifact("fresh", chrono::Duration::seconds(5))).await;
        assert_eq!(store.sweep().await, 2);
        assert_eq!(store.len().await, 1);
        assert!(store.get("fresh").await.is_some());
    }
}
