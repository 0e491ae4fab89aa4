//! aviationweather.gov advisories: SIGMETs and G-AIRMETs along the route.
//!
//! Each product is fetched as GeoJSON. A feature is kept when its area comes
//! within the corridor half-width of some sample point and its altitude band,
//! padded by two thousand feet either side, includes the cruise level.
//! Features with an unknown band are always kept.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use geo::{Closest, ClosestPoint, Contains, HaversineDistance, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::SamplePoint;
use crate::services::awc::parse_flight_level;
use crate::services::cache::TtlCache;
use crate::services::provider::ProviderError;

const SOURCE: &str = "aviationweather.gov";

/// Flight levels added above and below an advisory's band.
pub const ALTITUDE_PAD_FL: f64 = 20.0;

const METRES_PER_NM: f64 = 1852.0;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AdvisoryProduct {
    Sigmet,
    Tango,
    Zulu,
    Sierra,
}

impl AdvisoryProduct {
    pub const ALL: [AdvisoryProduct; 4] = [
        AdvisoryProduct::Sigmet,
        AdvisoryProduct::Tango,
        AdvisoryProduct::Zulu,
        AdvisoryProduct::Sierra,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdvisoryProduct::Sigmet => "sigmet",
            AdvisoryProduct::Tango => "tango",
            AdvisoryProduct::Zulu => "zulu",
            AdvisoryProduct::Sierra => "sierra",
        }
    }

    /// Map layer title.
    pub fn layer_name(&self) -> &'static str {
        match self {
            AdvisoryProduct::Sigmet => "SIGMETs",
            AdvisoryProduct::Tango => "G-AIRMET (Tango - Turb)",
            AdvisoryProduct::Zulu => "G-AIRMET (Zulu - Icing)",
            AdvisoryProduct::Sierra => "G-AIRMET (Sierra - IFR/Mtn)",
        }
    }

    fn path_and_query(&self) -> (&'static str, Vec<(&'static str, &'static str)>) {
        match self {
            AdvisoryProduct::Sigmet => ("airsigmet", vec![("format", "geojson")]),
            product => (
                "gairmet",
                vec![("product", product.as_str()), ("format", "geojson")],
            ),
        }
    }
}

/// One advisory area.
#[derive(Debug, Clone, PartialEq)]
pub struct Advisory {
    pub product: AdvisoryProduct,
    /// e.g. "TURB-HI", "ICE", "CONVECTIVE"
    pub hazard: String,
    pub base_fl: Option<f64>,
    pub top_fl: Option<f64>,
    pub raw_text: Option<String>,
    /// Lon/lat polygons
    pub area: Vec<Polygon<f64>>,
}

impl Advisory {
    pub fn color(&self) -> &'static str {
        hazard_color(&self.hazard)
    }

    /// "FL180-FL390", "up to FL120", or empty when the band is unknown.
    pub fn band_label(&self) -> String {
        let fl = |v: f64| {
            if v <= 0.0 {
                "SFC".to_string()
            } else {
                format!("FL{:03}", v.round() as i64)
            }
        };
        match (self.base_fl, self.top_fl) {
            (Some(lo), Some(hi)) => format!("{}-{}", fl(lo), fl(hi)),
            (None, Some(hi)) => format!("up to {}", fl(hi)),
            (Some(lo), None) => format!("from {}", fl(lo)),
            (None, None) => String::new(),
        }
    }

    /// Whether the padded band includes `cruise_fl`. Unknown bands match.
    pub fn overlaps_altitude(&self, cruise_fl: f64) -> bool {
        match (self.base_fl, self.top_fl) {
            (Some(lo), Some(hi)) => {
                lo - ALTITUDE_PAD_FL <= cruise_fl && cruise_fl <= hi + ALTITUDE_PAD_FL
            }
            _ => true,
        }
    }

    /// Whether any sample point lies inside the area or within
    /// `half_width_nm` of its edge.
    pub fn touches_corridor(&self, points: &[SamplePoint], half_width_nm: f64) -> bool {
        points.iter().any(|p| {
            let here = Point::new(p.longitude, p.latitude);
            self.area.iter().any(|polygon| {
                if polygon.contains(&here) {
                    return true;
                }
                match polygon.closest_point(&here) {
                    Closest::Intersection(_) => true,
                    Closest::SinglePoint(edge) => {
                        here.haversine_distance(&edge) / METRES_PER_NM <= half_width_nm
                    }
                    Closest::Indeterminate => false,
                }
            })
        })
    }

    /// Polygons as Leaflet `[lat, lon]` rings.
    pub fn lat_lon_rings(&self) -> Vec<Vec<Vec<[f64; 2]>>> {
        self.area
            .iter()
            .map(|polygon| {
                std::iter::once(polygon.exterior())
                    .chain(polygon.interiors())
                    .map(|ring| ring.coords().map(|c| [c.y, c.x]).collect())
                    .collect()
            })
            .collect()
    }
}

/// Map colour for a hazard label.
pub fn hazard_color(hazard: &str) -> &'static str {
    let h = hazard.to_ascii_lowercase();
    if h.contains("conv") || h.contains("ts") {
        "#d32f2f"
    } else if h.contains("turb") || h.contains("llws") {
        "#ef6c00"
    } else if h.contains("ice") || h.contains("fzlvl") {
        "#1e88e5"
    } else if h.contains("ifr") || h.contains("mtn") {
        "#757575"
    } else {
        "#8e24aa"
    }
}

/// Advisories along one route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteAdvisories {
    pub advisories: Vec<Advisory>,
    /// Products whose request failed
    pub missing_products: Vec<String>,
}

impl RouteAdvisories {
    /// Kept advisories per product, every product listed.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = AdvisoryProduct::ALL
            .iter()
            .map(|p| (p.as_str().to_string(), 0))
            .collect();
        for advisory in &self.advisories {
            *counts.entry(advisory.product.as_str().to_string()).or_default() += 1;
        }
        counts
    }

    pub fn of(&self, product: AdvisoryProduct) -> impl Iterator<Item = &Advisory> {
        self.advisories.iter().filter(move |a| a.product == product)
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
    },
    #[serde(other)]
    Other,
}

pub struct AdvisoryClient {
    client: reqwest::Client,
    base_url: String,
    cache: TtlCache<AdvisoryProduct, Arc<Vec<Advisory>>>,
}

impl AdvisoryClient {
    pub fn new(base_url: &str, http_timeout: Duration, cache_ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Advisories touching the corridor around `points` at `cruise_fl`.
    pub async fn along_route(
        &self,
        points: &[SamplePoint],
        cruise_fl: f64,
        half_width_nm: f64,
    ) -> RouteAdvisories {
        let results = join_all(AdvisoryProduct::ALL.iter().map(|p| self.product(*p))).await;

        let mut route = RouteAdvisories::default();
        for (product, result) in AdvisoryProduct::ALL.iter().zip(results) {
            match result {
                Ok(all) => {
                    let kept: Vec<Advisory> = all
                        .iter()
                        .filter(|a| a.overlaps_altitude(cruise_fl))
                        .filter(|a| a.touches_corridor(points, half_width_nm))
                        .cloned()
                        .collect();
                    tracing::debug!(
                        "{}: {} of {} areas touch the corridor at FL{}",
                        product.layer_name(),
                        kept.len(),
                        all.len(),
                        cruise_fl
                    );
                    route.advisories.extend(kept);
                }
                Err(e) => {
                    tracing::warn!("{} lookup failed: {}", product.layer_name(), e);
                    route.missing_products.push(product.as_str().to_string());
                }
            }
        }
        route
    }

    async fn product(&self, product: AdvisoryProduct) -> Result<Arc<Vec<Advisory>>, ProviderError> {
        if let Some(hit) = self.cache.get(&product).await {
            return Ok(hit);
        }

        let (path, query) = product.path_and_query();
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .query(&query)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(SOURCE, &e))?;

        // 204 when nothing is in effect
        let collection = if response.status() == reqwest::StatusCode::NO_CONTENT {
            FeatureCollection {
                features: Vec::new(),
            }
        } else if response.status().is_success() {
            response
                .json::<FeatureCollection>()
                .await
                .map_err(|e| ProviderError::from_reqwest(SOURCE, &e))?
        } else {
            return Err(ProviderError::from_status(SOURCE, response.status()));
        };

        let advisories = Arc::new(
            collection
                .features
                .into_iter()
                .filter_map(|f| to_advisory(product, f))
                .collect::<Vec<_>>(),
        );
        self.cache.insert(product, advisories.clone()).await;
        Ok(advisories)
    }
}

fn to_advisory(product: AdvisoryProduct, feature: Feature) -> Option<Advisory> {
    let area: Vec<Polygon<f64>> = match feature.geometry? {
        Geometry::Polygon { coordinates } => polygon(&coordinates).into_iter().collect(),
        Geometry::MultiPolygon { coordinates } => {
            coordinates.iter().filter_map(|p| polygon(p)).collect()
        }
        Geometry::Other => Vec::new(),
    };
    if area.is_empty() {
        return None;
    }

    let props = feature.properties.unwrap_or_default();
    let text = |key: &str| {
        props
            .get(key)
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
    };

    let hazard = ["hazard", "phenom", "type", "label", "rawHazard"]
        .iter()
        .find_map(|k| text(*k))
        .unwrap_or_else(|| "unknown".to_string());

    Some(Advisory {
        product,
        hazard,
        base_fl: level(&props, &["minAlt", "min_alt", "base"], &["altitudeLow1"]),
        top_fl: level(&props, &["maxAlt", "max_alt", "top"], &["altitudeHi1"]),
        raw_text: ["rawAirSigmet", "rawText", "raw"].iter().find_map(|k| text(*k)),
        area,
    })
}

/// Exterior ring plus holes; rings with fewer than three positions are dropped.
fn polygon(rings: &[Vec<Vec<f64>>]) -> Option<Polygon<f64>> {
    let mut rings = rings.iter().map(|ring| {
        ring.iter()
            .filter(|pos| pos.len() >= 2)
            .map(|pos| (pos[0], pos[1]))
            .collect::<Vec<(f64, f64)>>()
    });
    let exterior = rings.next().filter(|r| r.len() >= 3)?;
    let holes = rings
        .filter(|r| r.len() >= 3)
        .map(LineString::from)
        .collect();
    Some(Polygon::new(LineString::from(exterior), holes))
}

/// First parseable level among `fl_keys` (flight levels) then `feet_keys`.
fn level(
    props: &serde_json::Map<String, serde_json::Value>,
    fl_keys: &[&str],
    feet_keys: &[&str],
) -> Option<f64> {
    let parse = |v: &serde_json::Value| match v {
        serde_json::Value::String(s) if s.trim().eq_ignore_ascii_case("SFC") => Some(0.0),
        other => parse_flight_level(other),
    };
    fl_keys
        .iter()
        .filter_map(|k| props.get(*k))
        .find_map(parse)
        .or_else(|| {
            feet_keys
                .iter()
                .filter_map(|k| props.get(*k))
                .find_map(parse)
                .map(|ft| ft / 100.0)
        })
}
