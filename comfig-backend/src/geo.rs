//! Great-circle distances on the WGS84 ellipsoid.
//!
//! Karney's inverse geodesic solution, which converges for every pair of
//! points, nearly antipodal ones included.

use std::sync::LazyLock;

use geographiclib_rs::{Geodesic, InverseGeodesic};

/// WGS84 equatorial radius in metres.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

static WGS84: LazyLock<Geodesic> = LazyLock::new(|| Geodesic::new(WGS84_A, WGS84_F));

/// A point on the Earth's surface, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Build from the `[longitude, latitude]` order used by published server points.
    pub const fn from_lon_lat(point: [f64; 2]) -> Self {
        Self {
            lat: point[1],
            lon: point[0],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Surface distance to `other` in kilometres.
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        geodesic_distance_km(*self, *other)
    }
}

/// Ellipsoidal surface distance between two points in kilometres.
pub fn geodesic_distance_km(from: Coordinates, to: Coordinates) -> f64 {
    let metres: f64 = WGS84.inverse(from.lat, from.lon, to.lat, to.lon);
    metres / 1000.0
}
