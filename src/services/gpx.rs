//! GPX route import.
//!
//! Flight planning tools export routes as GPX. The importer reads, in order of
//! preference:
//! - `<rte><rtept>` route points (a planned route)
//! - `<trk><trkseg><trkpt>` track points (a flown or drawn track)
//! - bare `<wpt>` waypoints, in document order
//!
//! Elevations (`<ele>`, metres) become waypoint altitudes in feet.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::helpers::metres_to_feet;
use crate::services::corridor::{InvalidRouteError, Waypoint};

/// Errors that can occur during GPX parsing.
#[derive(Debug, Error)]
pub enum GpxError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid field value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<GpxError> for InvalidRouteError {
    fn from(err: GpxError) -> Self {
        InvalidRouteError::Gpx(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointKind {
    Route,
    Track,
    Waypoint,
}

impl PointKind {
    fn from_local_name(name: &str) -> Option<Self> {
        match name {
            "rtept" => Some(PointKind::Route),
            "trkpt" => Some(PointKind::Track),
            "wpt" => Some(PointKind::Waypoint),
            _ => None,
        }
    }
}

/// Point currently being read (while inside a point element).
struct OpenPoint {
    kind: PointKind,
    latitude: f64,
    longitude: f64,
    name: Option<String>,
    elevation_m: Option<f64>,
}

impl OpenPoint {
    fn into_waypoint(self) -> Waypoint {
        Waypoint {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude_ft: self.elevation_m.map(metres_to_feet),
            name: self.name,
        }
    }
}

/// Parse GPX XML and return the route it describes.
pub fn parse_route_points(gpx_xml: &str) -> Result<Vec<Waypoint>, GpxError> {
    let mut reader = Reader::from_str(gpx_xml);

    let mut route_points = Vec::new();
    let mut track_points = Vec::new();
    let mut waypoints = Vec::new();

    let mut open: Option<OpenPoint> = None;
    let mut in_extensions = false;
    // Child element of the open point whose text we want ("name" or "ele").
    let mut current_element: Option<&'static str> = None;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name_str(e.name().as_ref());
                match local.as_str() {
                    "rtept" | "trkpt" | "wpt" => {
                        if let Some(kind) = PointKind::from_local_name(&local) {
                            open = Some(open_point(kind, e)?);
                        }
                    }
                    "extensions" if open.is_some() => in_extensions = true,
                    "name" if open.is_some() && !in_extensions => current_element = Some("name"),
                    "ele" if open.is_some() && !in_extensions => current_element = Some("ele"),
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                // Self-closing point: `<rtept lat=".." lon=".."/>`
                let local = local_name_str(e.name().as_ref());
                if let Some(kind) = PointKind::from_local_name(&local) {
                    let point = open_point(kind, e)?;
                    push_point(point, &mut route_points, &mut track_points, &mut waypoints);
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(elem), Some(point)) = (current_element, open.as_mut()) {
                    let text = e.unescape().unwrap_or_default().trim().to_string();
                    if !text.is_empty() {
                        match elem {
                            "name" => point.name = Some(text),
                            "ele" => {
                                point.elevation_m = Some(text.parse().map_err(|_| {
                                    GpxError::InvalidValue {
                                        field: "ele".to_string(),
                                        message: format!("not a valid number: '{}'", text),
                                    }
                                })?);
                            }
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name_str(e.name().as_ref());
                current_element = None;
                if local == "extensions" {
                    in_extensions = false;
                } else if PointKind::from_local_name(&local).is_some() {
                    if let Some(point) = open.take() {
                        push_point(point, &mut route_points, &mut track_points, &mut waypoints);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(GpxError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }

    let chosen = if !route_points.is_empty() {
        route_points
    } else if !track_points.is_empty() {
        track_points
    } else {
        waypoints
    };

    if chosen.is_empty() {
        return Err(GpxError::MissingField(
            "at least one <rtept>, <trkpt> or <wpt> element".to_string(),
        ));
    }

    tracing::debug!("Imported {} route points from GPX", chosen.len());
    Ok(chosen)
}

fn push_point(
    point: OpenPoint,
    route_points: &mut Vec<Waypoint>,
    track_points: &mut Vec<Waypoint>,
    waypoints: &mut Vec<Waypoint>,
) {
    let target = match point.kind {
        PointKind::Route => route_points,
        PointKind::Track => track_points,
        PointKind::Waypoint => waypoints,
    };
    target.push(point.into_waypoint());
}

/// Read the mandatory `lat`/`lon` attributes of a point element.
fn open_point(kind: PointKind, e: &BytesStart<'_>) -> Result<OpenPoint, GpxError> {
    let mut latitude: Option<f64> = None;
    let mut longitude: Option<f64> = None;

    for attr in e.attributes().flatten() {
        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
        let val = std::str::from_utf8(&attr.value).unwrap_or("");
        let target = match key {
            "lat" => &mut latitude,
            "lon" => &mut longitude,
            _ => continue,
        };
        *target = Some(val.trim().parse().map_err(|_| GpxError::InvalidValue {
            field: key.to_string(),
            message: format!("not a valid number: '{}'", val),
        })?);
    }

    Ok(OpenPoint {
        kind,
        latitude: latitude.ok_or_else(|| GpxError::MissingField("lat attribute".to_string()))?,
        longitude: longitude.ok_or_else(|| GpxError::MissingField("lon attribute".to_string()))?,
        name: None,
        elevation_m: None,
    })
}

/// Extract the local name from a potentially namespaced XML element name.
/// e.g. `gpx:rtept` -> `rtept`, `rtept` -> `rtept`
fn local_name_str(full: &[u8]) -> String {
    let s = std::str::from_utf8(full).unwrap_or("");
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}
