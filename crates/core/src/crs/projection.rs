//! Pure-Rust map projections on the WGS84 ellipsoid.
//!
//! Forward and inverse formulas for the handful of CRSs the change pipeline
//! works in (Snyder 1987, USGS Prof. Paper 1395). No libproj, so results are
//! bit-for-bit reproducible across platforms.
//!
//! | EPSG | projection |
//! |------|------------|
//! | 4326 | geographic longitude/latitude (degrees) |
//! | 3857 | Web Mercator (spherical) |
//! | 326xx / 327xx | UTM north / south |
//! | 6933 | EASE-Grid 2.0 global, cylindrical equal area, φ₁ = 30° |

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use crate::crs::{CRS, EPSG_EASE_GRID_2, EPSG_WEB_MERCATOR, EPSG_WGS84};
use crate::error::{Error, Result};

// ── WGS84 ellipsoid constants ────────────────────────────────────────────

const A: f64 = 6_378_137.0; // semi-major axis (m)
const F: f64 = 1.0 / 298.257_223_563; // flattening
const E2: f64 = 2.0 * F - F * F; // eccentricity squared
const E_PRIME2: f64 = E2 / (1.0 - E2); // second eccentricity squared
const K0_UTM: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;
/// Web Mercator clips latitudes to keep `y` finite
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;
/// Standard parallel of EASE-Grid 2.0
const EASE_STD_PARALLEL_DEG: f64 = 30.0;

/// A supported projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Geographic,
    WebMercator,
    Utm { zone: u32, north: bool },
    EqualAreaCylindrical,
}

impl Projection {
    /// Resolve an EPSG code, `None` when unsupported
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        match epsg {
            EPSG_WGS84 => Some(Projection::Geographic),
            EPSG_WEB_MERCATOR => Some(Projection::WebMercator),
            EPSG_EASE_GRID_2 => Some(Projection::EqualAreaCylindrical),
            32601..=32660 => Some(Projection::Utm {
                zone: epsg - 32600,
                north: true,
            }),
            32701..=32760 => Some(Projection::Utm {
                zone: epsg - 32700,
                north: false,
            }),
            _ => None,
        }
    }

    /// Project WGS84 (longitude, latitude) in degrees into this CRS
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        match *self {
            Projection::Geographic => (lon, lat),
            Projection::WebMercator => mercator_forward(lon, lat),
            Projection::Utm { zone, north } => utm_forward(lon, lat, zone, north),
            Projection::EqualAreaCylindrical => cea_forward(lon, lat),
        }
    }

    /// Unproject CRS coordinates back to WGS84 (longitude, latitude) degrees
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Projection::Geographic => (x, y),
            Projection::WebMercator => mercator_inverse(x, y),
            Projection::Utm { zone, north } => utm_inverse(x, y, zone, north),
            Projection::EqualAreaCylindrical => cea_inverse(x, y),
        }
    }
}

/// Point transformer between two supported CRSs
#[derive(Debug, Clone, Copy)]
pub struct Transformer {
    from: Projection,
    to: Projection,
}

impl Transformer {
    /// Build a transformer, failing with [`Error::Geometry`] for unknown CRSs
    pub fn new(from: &CRS, to: &CRS) -> Result<Self> {
        Ok(Self {
            from: resolve(from)?,
            to: resolve(to)?,
        })
    }

    /// Whether source and target are the same projection
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Transform one coordinate pair
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_identity() {
            return (x, y);
        }
        let (lon, lat) = self.from.inverse(x, y);
        self.to.forward(lon, lat)
    }

    /// The reverse transformer
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }
}

fn resolve(crs: &CRS) -> Result<Projection> {
    crs.projection()
        .ok_or_else(|| Error::Geometry(format!("unsupported CRS {}", crs)))
}

// ── Web Mercator ─────────────────────────────────────────────────────────

fn mercator_forward(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    let x = A * lon.to_radians();
    let y = A * (FRAC_PI_4 + lat / 2.0).tan().ln();
    (x, y)
}

fn mercator_inverse(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / A).to_degrees();
    let lat = (2.0 * (y / A).exp().atan() - FRAC_PI_2).to_degrees();
    (lon, lat)
}

// ── UTM (Snyder pp. 61-64) ───────────────────────────────────────────────

fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

fn utm_forward(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a_coeff = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a_coeff * a_coeff;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    // Snyder eq. 8-9
    let easting = K0_UTM
        * n
        * (a_coeff
            + (1.0 - t + c) * a2 * a_coeff / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
        + FALSE_EASTING;

    // Snyder eq. 8-10
    let northing = K0_UTM
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    let northing = if north {
        northing
    } else {
        northing + FALSE_NORTHING_SOUTH
    };

    (easting, northing)
}

fn utm_inverse(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };
    let x = easting - FALSE_EASTING;

    let e4 = E2 * E2;
    let e6 = e4 * E2;

    // Footpoint latitude (Snyder eqs. 3-24, 3-26, 3-25)
    let m = y / K0_UTM;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let sqrt_1me2 = (1.0 - E2).sqrt();
    let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let cos1 = phi1.cos();
    let tan1 = phi1.tan();
    let c1 = E_PRIME2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let w = 1.0 - E2 * sin1 * sin1;
    let n1 = A / w.sqrt();
    let r1 = A * (1.0 - E2) / w.powf(1.5);
    let d = x / (n1 * K0_UTM);
    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d3 * d;
    let d5 = d4 * d;
    let d6 = d5 * d;

    // Snyder eq. 8-17
    let lat = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * E_PRIME2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    // Snyder eq. 8-18
    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                * d5
                / 120.0)
            / cos1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Meridional arc from equator to latitude `lat` (radians), Snyder eq. 3-21.
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

// ── Cylindrical equal area, ellipsoidal (Snyder pp. 81-83) ───────────────

/// `q` of Snyder eq. 3-12
fn authalic_q(sin_lat: f64) -> f64 {
    let e = E2.sqrt();
    let es = e * sin_lat;
    (1.0 - E2) * (sin_lat / (1.0 - E2 * sin_lat * sin_lat) - (1.0 / (2.0 * e)) * ((1.0 - es) / (1.0 + es)).ln())
}

/// Scale factor on the standard parallel, Snyder eq. 10-13
fn cea_k0() -> f64 {
    let phi1 = EASE_STD_PARALLEL_DEG.to_radians();
    phi1.cos() / (1.0 - E2 * phi1.sin() * phi1.sin()).sqrt()
}

fn cea_forward(lon: f64, lat: f64) -> (f64, f64) {
    let k0 = cea_k0();
    let x = A * k0 * lon.to_radians();
    let y = A * authalic_q(lat.to_radians().sin()) / (2.0 * k0);
    (x, y)
}

fn cea_inverse(x: f64, y: f64) -> (f64, f64) {
    let k0 = cea_k0();
    let qp = authalic_q(1.0);
    let beta = (2.0 * y * k0 / (A * qp)).clamp(-1.0, 1.0).asin();

    let e4 = E2 * E2;
    let e6 = e4 * E2;
    // Authalic to geodetic latitude, Snyder eq. 3-18
    let lat = beta
        + (E2 / 3.0 + 31.0 * e4 / 180.0 + 517.0 * e6 / 5040.0) * (2.0 * beta).sin()
        + (23.0 * e4 / 360.0 + 251.0 * e6 / 3780.0) * (4.0 * beta).sin()
        + (761.0 * e6 / 45360.0) * (6.0 * beta).sin();
    let lon = x / (A * k0);

    (lon.to_degrees(), lat.to_degrees())
}

// ── Tests ────────────────────────────────────────────────────────────────
