//! Plain geographic primitives.
//!
//! Coordinates follow two conventions that must not be mixed up: `Point`
//! carries `(lat, lon)`, while `Geometry` stores GeoJSON-order `[lon, lat]`
//! pairs exactly as routing providers emit them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres, as used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A latitude/longitude position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// GeoJSON coordinate pair (`[lon, lat]`).
    pub fn to_lon_lat(self) -> [f64; 2] {
        [self.lon, self.lat]
    }

    pub fn from_lon_lat(pair: [f64; 2]) -> Self {
        Self {
            lat: pair[1],
            lon: pair[0],
        }
    }
}

/// GeoJSON geometry subset used across the system.
///
/// Route geometries are always `LineString`s; street closures may be either
/// a point or a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    LineString { coordinates: Vec<[f64; 2]> },
    Point { coordinates: [f64; 2] },
}

impl Geometry {
    pub fn line(coordinates: Vec<[f64; 2]>) -> Self {
        Geometry::LineString { coordinates }
    }

    pub fn point(p: Point) -> Self {
        Geometry::Point {
            coordinates: p.to_lon_lat(),
        }
    }

    /// Coordinate pairs of a line string; a point yields a single pair.
    pub fn coords(&self) -> &[[f64; 2]] {
        match self {
            Geometry::LineString { coordinates } => coordinates,
            Geometry::Point { coordinates } => std::slice::from_ref(coordinates),
        }
    }

    pub fn is_line(&self) -> bool {
        matches!(self, Geometry::LineString { .. })
    }
}

/// Great-circle distance in metres between two points.
pub fn haversine_m(a: Point, b: Point) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Walks a line string until the covered length equals `progress * total`
/// and returns the interpolated position.
///
/// A single-coordinate geometry returns that coordinate for any progress;
/// an empty one returns `None`. Progress is clamped to `[0, 1]`.
pub fn interpolate_line(coords: &[[f64; 2]], progress: f64) -> Option<Point> {
    if coords.is_empty() {
        return None;
    }
    if coords.len() == 1 {
        return Some(Point::from_lon_lat(coords[0]));
    }

    let progress = progress.clamp(0.0, 1.0);
    let points: Vec<Point> = coords.iter().map(|c| Point::from_lon_lat(*c)).collect();
    let total: f64 = points
        .windows(2)
        .map(|w| haversine_m(w[0], w[1]))
        .sum();
    if total <= f64::EPSILON {
        return Some(points[0]);
    }

    let target = progress * total;
    let mut covered = 0.0;
    for w in points.windows(2) {
        let seg = haversine_m(w[0], w[1]);
        if covered + seg >= target {
            let ratio = if seg > 0.0 { (target - covered) / seg } else { 0.0 };
            return Some(Point::new(
                w[0].lat + (w[1].lat - w[0].lat) * ratio,
                w[0].lon + (w[1].lon - w[0].lon) * ratio,
            ));
        }
        covered += seg;
    }
    points.last().copied()
}

/// Perpendicular distance in metres from `p` to the segment `a`-`b`,
/// clamped to the segment endpoints.
///
/// Uses a local flat-earth projection, which is accurate at city scale and
/// keeps the computation deterministic.
pub fn point_segment_distance_m(p: Point, a: Point, b: Point) -> f64 {
    // Metres per degree at the segment's mean latitude.
    let mean_lat = ((a.lat + b.lat) / 2.0).to_radians();
    let m_per_deg_lat = 111_320.0;
    let m_per_deg_lon = 111_320.0 * mean_lat.cos();

    let ax = 0.0;
    let ay = 0.0;
    let bx = (b.lon - a.lon) * m_per_deg_lon;
    let by = (b.lat - a.lat) * m_per_deg_lat;
    let px = (p.lon - a.lon) * m_per_deg_lon;
    let py = (p.lat - a.lat) * m_per_deg_lat;

    let len_sq = (bx - ax).powi(2) + (by - ay).powi(2);
    let t = if len_sq <= f64::EPSILON {
        0.0
    } else {
        (((px - ax) * (bx - ax) + (py - ay) * (by - ay)) / len_sq).clamp(0.0, 1.0)
    };
    let cx = ax + t * (bx - ax);
    let cy = ay + t * (by - ay);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

/// Sample positions along a line string roughly every `interval_m` metres.
///
/// The final coordinate is always included so short routes still produce at
/// least one sample.
pub fn sample_points(coords: &[[f64; 2]], interval_m: f64) -> Vec<Point> {
    if coords.len() < 2 {
        return coords.iter().map(|c| Point::from_lon_lat(*c)).collect();
    }

    let mut samples = Vec::new();
    let mut carried = 0.0;
    let mut current = Point::from_lon_lat(coords[0]);

    for pair in &coords[1..] {
        let next = Point::from_lon_lat(*pair);
        let mut seg = haversine_m(current, next);

        while carried + seg >= interval_m {
            let ratio = if seg > 0.0 { (interval_m - carried) / seg } else { 0.0 };
            let mid = Point::new(
                current.lat + (next.lat - current.lat) * ratio,
                current.lon + (next.lon - current.lon) * ratio,
            );
            samples.push(mid);
            carried = 0.0;
            current = mid;
            seg = haversine_m(current, next);
        }

        carried += seg;
        current = next;
    }

    if let Some(last) = coords.last() {
        samples.push(Point::from_lon_lat(*last));
    }
    samples
}

/// Deterministic street-grid style path between two points.
///
/// Advances latitude first with two lateral detours (~50-120 m), mimicking
/// orthogonal city blocks, so the fallback geometry is never a trivial
/// straight line. Always yields at least 6 distinct points for distinct
/// endpoints.
pub fn grid_path(start: Point, end: Point) -> Vec<Point> {
    grid_path_with_offsets(start, end, 1.0)
}

/// Grid path with widened lateral offsets, used as a closure detour
/// candidate when the direct grid route is blocked.
pub fn detour_grid_path(start: Point, end: Point) -> Vec<Point> {
    grid_path_with_offsets(start, end, 2.5)
}

fn grid_path_with_offsets(start: Point, end: Point, scale: f64) -> Vec<Point> {
    let d_lat = end.lat - start.lat;
    let d_lon = end.lon - start.lon;

    let offset_lat = if d_lat.abs() > 0.002 { 0.0007 } else { 0.0004 } * scale;
    let offset_lon = if d_lon.abs() > 0.002 { 0.0007 } else { 0.0004 } * scale;
    let lat_sign = if d_lat >= 0.0 { 1.0 } else { -1.0 };
    let lon_sign = if d_lon >= 0.0 { 1.0 } else { -1.0 };

    let mid1_lat = start.lat + d_lat * 0.35;
    let mid2_lat = start.lat + d_lat * 0.65;
    let half_lon = start.lon + d_lon * 0.5;

    let raw = [
        start,
        Point::new(mid1_lat, start.lon),
        Point::new(mid1_lat, start.lon + offset_lon * lon_sign),
        Point::new(mid2_lat, start.lon + offset_lon * lon_sign),
        Point::new(mid2_lat + offset_lat * lat_sign, half_lon),
        Point::new(end.lat, half_lon),
        end,
    ];

    // Drop consecutive duplicates (degenerate when start == end).
    let mut path: Vec<Point> = Vec::with_capacity(raw.len());
    for p in raw {
        let dup = path.last().is_some_and(|last: &Point| {
            (last.lat - p.lat).abs() <= 1e-6 && (last.lon - p.lon).abs() <= 1e-6
        });
        if !dup {
            path.push(p);
        }
    }
    path
}

/// Converts a `(lat, lon)` path into a GeoJSON line string.
pub fn path_to_line(points: &[Point]) -> Geometry {
    Geometry::line(points.iter().map(|p| p.to_lon_lat()).collect())
}

/// Resolves a free-form address to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Returns `None` when the address cannot be resolved; the caller
    /// decides whether that is fatal.
    async fn resolve(&self, address: &str) -> Option<Point>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // Obelisco to Tribunales, roughly 400-500 m.
        let a = Point::new(-34.6037, -58.3816);
        let b = Point::new(-34.6018, -58.3851);
        let d = haversine_m(a, b);
        assert!(d > 300.0 && d < 600.0, "got {d}");
    }

    #[test]
    fn test_interpolate_midpoint_stays_in_bounds() {
        let coords = [[-58.3816, -34.6037], [-58.3770, -34.6100]];
        let p = interpolate_line(&coords, 0.5).unwrap();
        assert!((-34.6100..=-34.6037).contains(&p.lat));
        assert!((-58.3816..=-58.3770).contains(&p.lon));
    }

    #[test]
    fn test_interpolate_single_coordinate() {
        let coords = [[-58.3816, -34.6037]];
        for progress in [0.0, 0.3, 1.0] {
            let p = interpolate_line(&coords, progress).unwrap();
            assert_eq!(p.lat, -34.6037);
            assert_eq!(p.lon, -58.3816);
        }
    }

    #[test]
    fn test_interpolate_empty_is_none() {
        assert!(interpolate_line(&[], 0.5).is_none());
    }

    #[test]
    fn test_grid_path_has_enough_points() {
        let path = grid_path(Point::new(-34.6037, -58.3816), Point::new(-34.70, -58.50));
        assert!(path.len() >= 6, "got {} points", path.len());
        assert_eq!(path.first().copied().unwrap(), Point::new(-34.6037, -58.3816));
        assert_eq!(path.last().copied().unwrap(), Point::new(-34.70, -58.50));
    }

    #[test]
    fn test_grid_path_degenerate_endpoints_collapse() {
        let p = Point::new(-34.6, -58.4);
        let path = grid_path(p, p);
        assert!(!path.is_empty());
        assert!(path.len() < 7);
    }

    #[test]
    fn test_point_on_segment_has_zero_distance() {
        let a = Point::new(-34.60, -58.40);
        let b = Point::new(-34.62, -58.40);
        let mid = Point::new(-34.61, -58.40);
        assert!(point_segment_distance_m(mid, a, b) < 1.0);
    }

    #[test]
    fn test_point_off_segment_distance() {
        let a = Point::new(-34.60, -58.40);
        let b = Point::new(-34.62, -58.40);
        // ~0.009 degrees of longitude is roughly 820 m at this latitude.
        let p = Point::new(-34.61, -58.409);
        let d = point_segment_distance_m(p, a, b);
        assert!(d > 700.0 && d < 950.0, "got {d}");
    }

    #[test]
    fn test_sample_points_includes_terminal() {
        let coords = [[-58.3816, -34.6037], [-58.3770, -34.6100]];
        let samples = sample_points(&coords, 200.0);
        assert!(!samples.is_empty());
        let last = samples.last().unwrap();
        assert_eq!(*last, Point::from_lon_lat([-58.3770, -34.6100]));
    }
}
