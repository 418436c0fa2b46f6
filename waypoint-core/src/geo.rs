//! Geospatial primitives over route geometries.
//!
//! Routes are GeoJSON `LineString`s in `[lon, lat]` order. Distances use the
//! haversine formula on a spherical Earth, and interpolation walks each segment
//! along its great circle, so `point_at_distance` and `length_meters` agree.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS-84 geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    #[inline]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in metres.
    pub fn distance_m(self, other: GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();

        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();

        let a = (d_lat * 0.5).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon * 0.5).sin().powi(2);

        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Point reached by travelling `distance_m` from `self` on initial `bearing_deg`.
    pub fn destination(self, bearing_deg: f64, distance_m: f64) -> GeoPoint {
        let delta = distance_m / EARTH_RADIUS_M;
        let theta = bearing_deg.to_radians();
        let lat1 = self.lat.to_radians();
        let lon1 = self.lon.to_radians();

        let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
        let lon2 = lon1
            + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

        GeoPoint {
            lat: lat2.to_degrees(),
            lon: normalize_longitude(lon2.to_degrees()),
        }
    }

    fn is_valid(self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// Ordered path geometry a vehicle follows.
///
/// Serializes as a GeoJSON `LineString`: `{"type":"LineString","coordinates":[[lon,lat],...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "LineString")]
pub struct RouteGeometry {
    pub coordinates: Vec<[f64; 2]>,
}

impl RouteGeometry {
    /// Builds a route from `(lat, lon)` points.
    pub fn from_points(points: &[GeoPoint]) -> Self {
        Self {
            coordinates: points.iter().map(|p| [p.lon, p.lat]).collect(),
        }
    }

    /// Vertex `index` as a [`GeoPoint`].
    pub fn point(&self, index: usize) -> Option<GeoPoint> {
        self.coordinates
            .get(index)
            .map(|[lon, lat]| GeoPoint::new(*lat, *lon))
    }

    /// First vertex of the route.
    pub fn start(&self) -> Option<GeoPoint> {
        self.point(0)
    }

    /// Terminal vertex of the route.
    pub fn end(&self) -> Option<GeoPoint> {
        self.coordinates.len().checked_sub(1).and_then(|i| self.point(i))
    }

    /// Checks that the geometry can be walked.
    ///
    /// # Errors
    ///
    /// - `GeoError::TooFewCoordinates` - If fewer than two vertices
    /// - `GeoError::InvalidCoordinate` - If a vertex is non-finite or out of range
    pub fn validate(&self) -> Result<(), GeoError> {
        if self.coordinates.len() < 2 {
            return Err(GeoError::TooFewCoordinates {
                count: self.coordinates.len(),
            });
        }
        for (index, [lon, lat]) in self.coordinates.iter().enumerate() {
            if !GeoPoint::new(*lat, *lon).is_valid() {
                return Err(GeoError::InvalidCoordinate {
                    index,
                    lat: *lat,
                    lon: *lon,
                });
            }
        }
        Ok(())
    }

    /// Total geometric length in metres.
    ///
    /// # Errors
    ///
    /// - `GeoError` - If the geometry fails [`RouteGeometry::validate`]
    pub fn length_meters(&self) -> Result<f64, GeoError> {
        self.validate()?;
        Ok(self.segments().map(|(a, b)| a.distance_m(b)).sum())
    }

    fn segments(&self) -> impl Iterator<Item = (GeoPoint, GeoPoint)> + '_ {
        self.coordinates.windows(2).map(|pair| {
            let [lon_a, lat_a] = pair[0];
            let [lon_b, lat_b] = pair[1];
            (GeoPoint::new(lat_a, lon_a), GeoPoint::new(lat_b, lon_b))
        })
    }
}

/// Returns the point `distance_m` metres from the start of `route`.
///
/// Distances are clamped to the route: anything at or below zero (and NaN)
/// yields the first vertex, anything at or past the end yields the terminal
/// vertex exactly.
///
/// # Errors
///
/// - `GeoError` - If the geometry fails [`RouteGeometry::validate`]
pub fn point_at_distance(route: &RouteGeometry, distance_m: f64) -> Result<GeoPoint, GeoError> {
    route.validate()?;

    let first = route.point(0).ok_or(GeoError::TooFewCoordinates { count: 0 })?;
    if distance_m.is_nan() || distance_m <= 0.0 {
        return Ok(first);
    }

    let mut travelled = 0.0;
    for (from, to) in route.segments() {
        let segment = from.distance_m(to);
        if travelled + segment > distance_m {
            let into_segment = distance_m - travelled;
            if segment <= f64::EPSILON {
                return Ok(from);
            }
            return Ok(from.destination(bearing_degrees(from, to), into_segment));
        }
        travelled += segment;
    }

    route.end().ok_or(GeoError::TooFewCoordinates { count: 0 })
}

/// Initial compass bearing from `from` to `to`, in `[0, 360)`.
///
/// Coincident points have no direction and report `0.0`.
pub fn bearing_degrees(from: GeoPoint, to: GeoPoint) -> f64 {
    if from == to {
        return 0.0;
    }

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lon = (to.lon - from.lon).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if bearing >= 360.0 { 0.0 } else { bearing }
}

fn normalize_longitude(lon: f64) -> f64 {
    (lon + 540.0).rem_euclid(360.0) - 180.0
}

/// Errors raised while walking a malformed route geometry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("Route geometry needs at least 2 coordinates, got {count}")]
    TooFewCoordinates { count: usize },

    #[error("Invalid coordinate at index {index}: lat={lat}, lon={lon}")]
    InvalidCoordinate { index: usize, lat: f64, lon: f64 },

    #[error("Simulation has no route geometry")]
    MissingRoute,
}
