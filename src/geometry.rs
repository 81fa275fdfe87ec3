// Geometry kernel (C1): pure functions on WGS84 coordinates. All functions
// are total; invalid inputs produce InvalidGeometry rather than a default.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// A WGS84 point. Field names are explicit to avoid [lat,lng]/[lng,lat]
/// ambiguity — wire payloads use [lng, lat] and convert to this struct
/// exactly once at the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Result<Self, EngineError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(EngineError::InvalidInput(format!("latitude {lat} out of range")));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(EngineError::InvalidInput(format!("longitude {lon} out of range")));
        }
        Ok(Self { lat, lon })
    }
}

/// A closed simple polygon: first and last vertex coincide, at least 4 vertices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Point>,
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const CIRCLE_VERTEX_COUNT: usize = 64;

/// Ray-casting point-in-polygon test. On-edge points count as inside, for
/// deterministic classification at shared zone boundaries.
pub fn contains(polygon: &Polygon, point: Point) -> bool {
    let v = &polygon.vertices;
    if v.len() < 4 {
        return false;
    }
    for w in v.windows(2) {
        if point_on_segment(w[0], w[1], point) {
            return true;
        }
    }
    let n = v.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (v[i].lon, v[i].lat);
        let (xj, yj) = (v[j].lon, v[j].lat);
        let intersects = ((yi > point.lat) != (yj > point.lat))
            && (point.lon < (xj - xi) * (point.lat - yi) / (yj - yi) + xi);
        if intersects {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn point_on_segment(a: Point, b: Point, p: Point) -> bool {
    let cross = (b.lon - a.lon) * (p.lat - a.lat) - (b.lat - a.lat) * (p.lon - a.lon);
    if cross.abs() > 1e-9 {
        return false;
    }
    let within_box = p.lon >= a.lon.min(b.lon) - 1e-9
        && p.lon <= a.lon.max(b.lon) + 1e-9
        && p.lat >= a.lat.min(b.lat) - 1e-9
        && p.lat <= a.lat.max(b.lat) + 1e-9;
    within_box
}

/// Validity: closed ring, >= 4 vertices, no self-intersections. Naive O(n^2)
/// segment-intersection check — adequate for the small polygons this system
/// handles (tourist safety zones, not arbitrary GIS shapes).
pub fn valid(polygon: &Polygon) -> bool {
    let v = &polygon.vertices;
    if v.len() < 4 {
        return false;
    }
    if v.first() != v.last() {
        return false;
    }
    // Drop the duplicated closing vertex for the intersection scan.
    let ring = &v[..v.len() - 1];
    let n = ring.len();
    if n < 3 {
        return false;
    }
    for i in 0..n {
        let a1 = ring[i];
        let a2 = ring[(i + 1) % n];
        for j in (i + 1)..n {
            // Adjacent edges share an endpoint by construction; skip them.
            if j == i || j == (i + 1) % n || (j + 1) % n == i {
                continue;
            }
            let b1 = ring[j];
            let b2 = ring[(j + 1) % n];
            if segments_intersect(a1, a2, b1, b2) {
                return false;
            }
        }
    }
    true
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.lon <= a.lon.max(b.lon) && p.lon >= a.lon.min(b.lon) && p.lat <= a.lat.max(b.lat) && p.lat >= a.lat.min(b.lat)
}

fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let o1 = orientation(a1, a2, b1);
    let o2 = orientation(a1, a2, b2);
    let o3 = orientation(b1, b2, a1);
    let o4 = orientation(b1, b2, a2);

    if (o1 > 0.0) != (o2 > 0.0) && (o3 > 0.0) != (o4 > 0.0) && o1 != 0.0 && o2 != 0.0 {
        return true;
    }
    if o1 == 0.0 && on_segment(a1, a2, b1) {
        return true;
    }
    if o2 == 0.0 && on_segment(a1, a2, b2) {
        return true;
    }
    if o3 == 0.0 && on_segment(b1, b2, a1) {
        return true;
    }
    if o4 == 0.0 && on_segment(b1, b2, a2) {
        return true;
    }
    false
}

/// Normalizes a circle (center + radius meters) to a closed polygon at a
/// fixed vertex count, so the evaluator can treat all zone shapes
/// uniformly.
pub fn normalize_circle(center: Point, radius_m: f64, vertex_count: usize) -> Result<Polygon, EngineError> {
    if radius_m <= 0.0 {
        return Err(EngineError::InvalidGeometry(format!("radius {radius_m} must be positive")));
    }
    if vertex_count < 4 {
        return Err(EngineError::InvalidGeometry("circle vertex count must be >= 4".into()));
    }
    let lat_rad = center.lat.to_radians();
    let mut vertices = Vec::with_capacity(vertex_count + 1);
    for i in 0..vertex_count {
        let theta = 2.0 * std::f64::consts::PI * (i as f64) / (vertex_count as f64);
        let d_lat = (radius_m * theta.cos()) / EARTH_RADIUS_M;
        let d_lon = (radius_m * theta.sin()) / (EARTH_RADIUS_M * lat_rad.cos().max(1e-9));
        let lat = center.lat + d_lat.to_degrees();
        let lon = center.lon + d_lon.to_degrees();
        vertices.push(Point::new(lat, lon)?);
    }
    vertices.push(vertices[0]);
    Ok(Polygon { vertices })
}

/// Haversine great-circle distance in meters.
pub fn distance(a: Point, b: Point) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Forward azimuth in degrees, [0, 360).
pub fn bearing(a: Point, b: Point) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lon = (b.lon - a.lon).to_radians();
    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    let deg = y.atan2(x).to_degrees();
    (deg + 360.0) % 360.0
}
