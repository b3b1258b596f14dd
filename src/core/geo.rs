//! # Geodesic utilities
//!
//! Great-circle distance and running centroids for position samples.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points, metres |
//! | [`implied_speed`] | Distance over elapsed time, m/s |
//! | [`Centroid`] | Running mean of clustered points |
//! | [`DistanceSum`] | Compensated accumulator for many small hops |
//!
//! All functions expect WGS84 latitude/longitude in degrees. Distances use a
//! spherical Earth (mean radius), which is accurate to ~0.3% and plenty for
//! stop detection and mileage.

use serde::{Deserialize, Serialize};

/// IUGG mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance in metres.
///
/// The haversine term is clamped to `[0, 1]` before the square roots: for
/// nearly antipodal or identical points rounding can push it just outside the
/// domain and `asin` would return NaN.
///
/// ```rust
/// use rfieldtrack::core::geo::{GeoPoint, haversine_distance};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
/// let d = haversine_distance(&london, &paris);
/// assert!((d - 343_560.0).abs() < 1_000.0);
/// ```
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Speed needed to travel from `a` to `b` in `elapsed_secs`.
///
/// Zero elapsed time with a non-zero displacement is infinitely fast.
pub fn implied_speed(a: &GeoPoint, b: &GeoPoint, elapsed_secs: f64) -> f64 {
    let d = haversine_distance(a, b);
    if elapsed_secs <= 0.0 {
        return if d > 0.0 { f64::INFINITY } else { 0.0 };
    }
    d / elapsed_secs
}

/// Running arithmetic mean of points. Adequate for clusters of a few hundred
/// metres away from the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Centroid {
    lat_sum: f64,
    lon_sum: f64,
    count: u32,
}

impl Centroid {
    pub fn starting_at(p: &GeoPoint) -> Self {
        let mut c = Self::default();
        c.add(p);
        c
    }

    pub fn add(&mut self, p: &GeoPoint) {
        self.lat_sum += p.latitude;
        self.lon_sum += p.longitude;
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn center(&self) -> Option<GeoPoint> {
        if self.count == 0 {
            return None;
        }
        let n = f64::from(self.count);
        Some(GeoPoint::new(self.lat_sum / n, self.lon_sum / n))
    }
}

/// Kahan-compensated sum, so thousands of short hops add up without drift.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DistanceSum {
    sum: f64,
    compensation: f64,
}

impl DistanceSum {
    pub fn new(initial: f64) -> Self {
        Self {
            sum: initial,
            compensation: 0.0,
        }
    }

    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    pub fn value(&self) -> f64 {
        self.sum
    }
}
